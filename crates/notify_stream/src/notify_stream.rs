use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    backoff::ReconnectBackoff,
    provider::{new, NotifyProvider, ProviderType},
    ConnectionState, NotifyStreamError, PlaybackNotification,
};

/// Long-lived push subscription. Keeps one provider connected, reconnecting
/// with exponential backoff until cancelled.
#[derive(Clone)]
pub struct NotifyStream {
    provider: Arc<dyn NotifyProvider>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    backoff: ReconnectBackoff,
}

impl NotifyStream {
    pub fn new(
        provider_type: ProviderType,
        name: &str,
        base_url: &str,
        token: &str,
        keepalive: Duration,
    ) -> Result<Self, NotifyStreamError> {
        let provider = new(provider_type, name, base_url, token, keepalive)?;
        Ok(Self::with_provider(Arc::from(provider)))
    }

    pub fn with_provider(provider: Arc<dyn NotifyProvider>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            provider,
            state_tx: Arc::new(state_tx),
            backoff: ReconnectBackoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Runs until `cancel` fires or the receiving side of `tx` is dropped.
    /// Cancellation interrupts both an open connection and a backoff wait.
    pub async fn run(&self, tx: mpsc::Sender<PlaybackNotification>, cancel: CancellationToken) {
        let name = self.provider.name().to_string();
        let mut backoff = self.backoff.clone();
        backoff.reset();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.state_tx.send_replace(ConnectionState::Connecting);
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                v = self.provider.connect_and_handle(tx.clone(), &self.state_tx) => v,
            };

            let was_connected = *self.state_tx.borrow() == ConnectionState::Connected;
            self.state_tx.send_replace(ConnectionState::Disconnected);
            if was_connected {
                backoff.reset();
            }

            match result {
                Ok(()) => info!("[{}]Notification socket closed", name),
                Err(e) => warn!("[{}]Notification socket error: {}", name, e),
            }

            if tx.is_closed() {
                info!("[{}]Notification receiver dropped, stop reconnecting", name);
                break;
            }

            let delay = backoff.next_delay();
            info!("[{}]Reconnecting in {} seconds", name, delay.as_secs());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!("[{}]Notification stream stopped", name);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::NotificationState;

    /// Scripted provider: each attempt pops one outcome; `true` means the
    /// handshake succeeds before the connection drops.
    struct ScriptedProvider {
        outcomes: Mutex<VecDeque<bool>>,
        attempts: Mutex<Vec<Instant>>,
        attempt_tx: mpsc::UnboundedSender<usize>,
    }

    impl ScriptedProvider {
        fn new(outcomes: &[bool]) -> (Arc<Self>, mpsc::UnboundedReceiver<usize>) {
            let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();
            let provider = Arc::new(Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                attempts: Mutex::new(Vec::new()),
                attempt_tx,
            });
            (provider, attempt_rx)
        }

        fn gaps(&self) -> Vec<u64> {
            let attempts = self.attempts.lock().unwrap();
            attempts
                .windows(2)
                .map(|w| (w[1] - w[0]).as_secs())
                .collect()
        }
    }

    #[async_trait]
    impl NotifyProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn connect_and_handle(
            &self,
            tx: mpsc::Sender<PlaybackNotification>,
            state: &watch::Sender<ConnectionState>,
        ) -> Result<(), NotifyStreamError> {
            let count = {
                let mut attempts = self.attempts.lock().unwrap();
                attempts.push(Instant::now());
                attempts.len()
            };
            let _ = self.attempt_tx.send(count);

            let connects = self.outcomes.lock().unwrap().pop_front();
            match connects {
                Some(true) => {
                    state.send_replace(ConnectionState::Connected);
                    let _ = tx
                        .send(PlaybackNotification {
                            session_key: count.to_string(),
                            item_key: "1".to_string(),
                            state: NotificationState::Playing,
                            view_offset_ms: 0,
                        })
                        .await;
                    Err(NotifyStreamError::WebsocketError {
                        err: "dropped".to_string(),
                    })
                }
                Some(false) => Err(NotifyStreamError::WebsocketError {
                    err: "refused".to_string(),
                }),
                // script exhausted: hang until cancelled
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_failed_attempts() {
        let _ = env_logger::try_init();
        let (provider, mut attempts) = ScriptedProvider::new(&[false, false, false, false]);
        let stream = NotifyStream::with_provider(provider.clone());
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let stream = stream.clone();
            let cancel = cancel.clone();
            async move { stream.run(tx, cancel).await }
        });

        while let Some(n) = attempts.recv().await {
            if n == 5 {
                break;
            }
        }
        assert_eq!(provider.gaps(), vec![1, 2, 4, 8]);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(*stream.state().borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_connection_resets_backoff() {
        let (provider, mut attempts) = ScriptedProvider::new(&[false, false, true, false]);
        let stream = NotifyStream::with_provider(provider.clone());
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let stream = stream.clone();
            let cancel = cancel.clone();
            async move { stream.run(tx, cancel).await }
        });

        while let Some(n) = attempts.recv().await {
            if n == 5 {
                break;
            }
        }
        // 1s, 2s, then reset by the good connection: 1s, 2s
        assert_eq!(provider.gaps(), vec![1, 2, 1, 2]);
        assert_eq!(rx.recv().await.unwrap().session_key, "3");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_backoff_wait() {
        let (provider, mut attempts) = ScriptedProvider::new(&[false]);
        let stream = NotifyStream::with_provider(provider)
            .with_backoff(ReconnectBackoff::new(
                Duration::from_secs(600),
                Duration::from_secs(600),
            ));
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let started = Instant::now();
        let handle = tokio::spawn({
            let stream = stream.clone();
            let cancel = cancel.clone();
            async move { stream.run(tx, cancel).await }
        });

        assert_eq!(attempts.recv().await, Some(1));
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_open_connection() {
        let (provider, mut attempts) = ScriptedProvider::new(&[]);
        let stream = NotifyStream::with_provider(provider);
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let stream = stream.clone();
            let cancel = cancel.clone();
            async move { stream.run(tx, cancel).await }
        });

        assert_eq!(attempts.recv().await, Some(1));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run did not stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_receiver_dropped() {
        let (provider, _attempts) = ScriptedProvider::new(&[false, false]);
        let stream = NotifyStream::with_provider(provider);
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        tokio::time::timeout(
            Duration::from_secs(1),
            stream.run(tx, CancellationToken::new()),
        )
        .await
        .expect("run did not stop");
    }
}
