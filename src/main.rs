mod config;
mod health;
mod history;
mod http_server;
mod hub;
mod live;
mod poller;
mod reconciler;
mod server_manager;
mod state;

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::health::HealthRegistry;
use crate::history::webhook::{WebhookConfig, WebhookHistoryWriter};
use crate::history::{HistoryWriter, LogHistoryWriter};
use crate::hub::Hub;
use crate::live::LiveCoordinator;
use crate::server_manager::ServerManager;
use crate::state::State;

const HUB_CHANNEL_CAPACITY: usize = 256;
const HISTORY_CHANNEL_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(author, version, about = "Watches media servers for active playback sessions")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "streamwatch.toml")]
    config: PathBuf,
}

fn setup_logging(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let level = config.log_level();
    let log_config = ConfigBuilder::new()
        .add_filter_ignore_str("hyper")
        .add_filter_ignore_str("reqwest")
        .add_filter_ignore_str("tungstenite")
        .add_filter_ignore_str("socketioxide")
        .add_filter_ignore_str("engineioxide")
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        log_config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if !config.log_file.is_empty() {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file)?;
        loggers.push(WriteLogger::new(level, log_config, file));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}

fn history_writer(config: &Config) -> Result<Arc<dyn HistoryWriter>, Box<dyn std::error::Error>> {
    if config.history_webhook.is_empty() {
        return Ok(Arc::new(LogHistoryWriter));
    }
    let writer = WebhookHistoryWriter::new(WebhookConfig {
        url: config.history_webhook.clone(),
        timeout: config.request_timeout(),
        retry_attempts: config.history_retry_attempts,
        ..Default::default()
    })?;
    Ok(Arc::new(writer))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    setup_logging(&config)?;
    log::info!(
        "Loaded {} servers ({} enabled) from {:?}",
        config.servers.len(),
        config.enabled_servers().count(),
        args.config
    );

    let health = Arc::new(HealthRegistry::new());
    let live = Arc::new(LiveCoordinator::new());
    let manager = ServerManager::new(health.clone());
    for server in &config.servers {
        manager.add_server(server, config.request_timeout())?;
    }
    manager.test_connections().await;

    let cancel = CancellationToken::new();
    let (hub_tx, hub_rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);
    let (history_tx, history_rx) = mpsc::channel(HISTORY_CHANNEL_CAPACITY);

    let history_task = tokio::spawn(history::run(history_writer(&config)?, history_rx));
    let hub = Hub::new(live.clone(), manager.refresh_handles(), history_tx);
    let hub_task = tokio::spawn(hub.run(hub_rx, cancel.clone()));

    let mut tasks = manager.spawn_pollers(config.poll_interval(), hub_tx.clone(), cancel.clone());
    tasks.extend(manager.spawn_subscriptions(
        config.keepalive_interval(),
        hub_tx,
        cancel.clone(),
    ));

    let addr: SocketAddr = config.listen.parse()?;
    let state = State { live, health };
    tasks.push(tokio::spawn(http_server::api_server::start_api_server(
        state,
        addr,
        cancel.clone(),
    )));

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");
    cancel.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            log::error!("Task failed during shutdown: {}", e);
        }
    }
    hub_task.await?;
    history_task.await?;
    Ok(())
}
