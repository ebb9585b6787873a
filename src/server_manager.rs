use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{error, info, warn};
use media_server::{MediaServerAdapter, MediaServerError, ServerConnection};
use notify_stream::NotifyStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::health::{HealthRegistry, HealthStatus};
use crate::hub::HubMessage;
use crate::poller::Poller;

const PUSH_CHANNEL_CAPACITY: usize = 64;

/// Owns one adapter per enabled server and spawns their background tasks.
pub struct ServerManager {
    adapters: DashMap<String, Arc<dyn MediaServerAdapter>>,
    refresh: DashMap<String, Arc<Notify>>,
    health: Arc<HealthRegistry>,
}

impl ServerManager {
    pub fn new(health: Arc<HealthRegistry>) -> Self {
        Self {
            adapters: DashMap::new(),
            refresh: DashMap::new(),
            health,
        }
    }

    pub fn add_server(
        &self,
        connection: &ServerConnection,
        timeout: Duration,
    ) -> Result<(), MediaServerError> {
        self.health.register(connection);
        if !connection.enabled {
            info!("[{}]Server disabled, not polling", connection.id);
            return Ok(());
        }
        let adapter = media_server::new(connection, timeout)?;
        self.add_adapter(adapter);
        Ok(())
    }

    pub fn add_adapter(&self, adapter: Arc<dyn MediaServerAdapter>) {
        let server_id = adapter.server_id().to_string();
        info!(
            "[{}]Added {} server",
            server_id,
            adapter.server_type().as_str()
        );
        self.refresh
            .insert(server_id.clone(), Arc::new(Notify::new()));
        self.adapters.insert(server_id, adapter);
    }

    pub fn server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.iter().map(|a| a.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn refresh_handles(&self) -> HashMap<String, Arc<Notify>> {
        self.refresh
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Startup probe of every server. Failures are logged and recorded, the
    /// poll loop keeps trying regardless.
    pub async fn test_connections(&self) {
        let adapters: Vec<Arc<dyn MediaServerAdapter>> =
            self.adapters.iter().map(|a| a.value().clone()).collect();
        for adapter in adapters {
            let server_id = adapter.server_id();
            match adapter.test_connection().await {
                Ok(()) => info!("[{}]Connection ok", server_id),
                Err(e) => {
                    let status = if e.is_auth() {
                        error!("[{}]Credentials rejected: {}", server_id, e);
                        HealthStatus::NeedsAttention
                    } else {
                        warn!("[{}]Connection test failed: {}", server_id, e);
                        HealthStatus::Unreachable
                    };
                    self.health
                        .record_failure(server_id, status, e.to_string(), chrono::Utc::now());
                }
            }
        }
    }

    pub fn spawn_pollers(
        &self,
        interval: Duration,
        tx: mpsc::Sender<HubMessage>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        self.adapters
            .iter()
            .map(|entry| {
                let refresh = self
                    .refresh
                    .get(entry.key())
                    .map(|r| r.value().clone())
                    .unwrap_or_default();
                let poller = Poller::new(
                    entry.value().clone(),
                    interval,
                    refresh,
                    self.health.clone(),
                );
                tokio::spawn(poller.run(tx.clone(), cancel.clone()))
            })
            .collect()
    }

    pub fn spawn_subscriptions(
        &self,
        keepalive: Duration,
        tx: mpsc::Sender<HubMessage>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for entry in self.adapters.iter() {
            let adapter = entry.value();
            if !adapter.server_type().supports_push() {
                continue;
            }
            match adapter.subscribe(keepalive) {
                Ok(stream) => handles.push(tokio::spawn(forward_notifications(
                    entry.key().clone(),
                    stream,
                    self.health.clone(),
                    tx.clone(),
                    cancel.clone(),
                ))),
                Err(e) => warn!("[{}]Push subscription unavailable: {}", entry.key(), e),
            }
        }
        handles
    }
}

/// Runs one push subscription and tags its notifications with the server id.
async fn forward_notifications(
    server_id: String,
    stream: NotifyStream,
    health: Arc<HealthRegistry>,
    tx: mpsc::Sender<HubMessage>,
    cancel: CancellationToken,
) {
    let (notify_tx, mut notify_rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
    let mut state_rx = stream.state();
    let runner = stream.clone();
    let run = tokio::spawn(async move { runner.run(notify_tx, cancel).await });

    loop {
        tokio::select! {
            notification = notify_rx.recv() => match notification {
                Some(notification) => {
                    let message = HubMessage::Push {
                        server_id: server_id.clone(),
                        notification,
                    };
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                health.set_push_state(&server_id, state);
            }
        }
    }

    drop(notify_rx);
    if let Err(e) = run.await {
        error!("[{}]Push subscription task failed: {}", server_id, e);
    }
}
