use std::time::Duration;

use notify_stream::{provider::ProviderType, NotifyStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    // PLEX_URL=http://127.0.0.1:32400 PLEX_TOKEN=... cargo run --example plex
    let base_url = std::env::var("PLEX_URL").unwrap_or_else(|_| "http://127.0.0.1:32400".into());
    let token = std::env::var("PLEX_TOKEN").unwrap_or_default();

    let stream = NotifyStream::new(
        ProviderType::Plex,
        "plex",
        &base_url,
        &token,
        Duration::from_secs(30),
    )?;
    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    let runner = stream.clone();
    let run_cancel = cancel.clone();
    let handle = tokio::spawn(async move { runner.run(tx, run_cancel).await });

    let deadline = tokio::time::sleep(Duration::from_secs(60));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            msg = rx.recv() => match msg {
                Some(notification) => log::info!("Received notification: {:?}", notification),
                None => break,
            },
        }
    }

    cancel.cancel();
    handle.await?;
    Ok(())
}
