use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use media_server::MediaServerAdapter;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::health::{HealthRegistry, HealthStatus};
use crate::hub::HubMessage;
use crate::reconciler::ServerSnapshot;

/// Poll loop of one server. Runs on the shared interval and additionally
/// whenever `refresh` is notified.
pub struct Poller {
    adapter: Arc<dyn MediaServerAdapter>,
    interval: Duration,
    refresh: Arc<Notify>,
    health: Arc<HealthRegistry>,
}

impl Poller {
    pub fn new(
        adapter: Arc<dyn MediaServerAdapter>,
        interval: Duration,
        refresh: Arc<Notify>,
        health: Arc<HealthRegistry>,
    ) -> Self {
        Self {
            adapter,
            interval,
            refresh,
            health,
        }
    }

    /// One fetch, classified. Never fails: connectivity problems become an
    /// unavailable snapshot, auth and whole-payload decode failures an empty one.
    pub async fn poll_once(&self) -> ServerSnapshot {
        let server_id = self.adapter.server_id();
        let now = Utc::now();
        match self.adapter.get_sessions().await {
            Ok(streams) => {
                debug!("[{}]Polled {} sessions", server_id, streams.len());
                self.health.record_success(server_id, now);
                ServerSnapshot::sessions(server_id, streams)
            }
            Err(e) if e.is_auth() => {
                error!("[{}]Credentials rejected: {}", server_id, e);
                self.health
                    .record_failure(server_id, HealthStatus::NeedsAttention, e.to_string(), now);
                ServerSnapshot::sessions(server_id, Vec::new())
            }
            Err(e) if e.is_decode() => {
                warn!("[{}]Unreadable sessions payload: {}", server_id, e);
                self.health
                    .record_failure(server_id, HealthStatus::DecodeError, e.to_string(), now);
                ServerSnapshot::sessions(server_id, Vec::new())
            }
            Err(e) => {
                warn!("[{}]Server unreachable: {}", server_id, e);
                self.health
                    .record_failure(server_id, HealthStatus::Unreachable, e.to_string(), now);
                ServerSnapshot::unavailable(server_id)
            }
        }
    }

    pub async fn run(self, tx: mpsc::Sender<HubMessage>, cancel: CancellationToken) {
        let server_id = self.adapter.server_id().to_string();
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "[{}]Polling every {} seconds",
            server_id,
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.refresh.notified() => {
                    debug!("[{}]Out of cycle poll requested", server_id);
                }
            }

            let snapshot = tokio::select! {
                _ = cancel.cancelled() => break,
                snapshot = self.poll_once() => snapshot,
            };
            if tx.send(HubMessage::Snapshot(snapshot)).await.is_err() {
                break;
            }
        }

        info!("[{}]Poller stopped", server_id);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use media_server::models::{ItemDetails, Library, LibraryItem, ServerConnection};
    use media_server::{ActiveStream, MediaServerError, ServerType};
    use tokio::time::Instant;

    use super::*;
    use crate::reconciler::SnapshotOutcome;

    /// Adapter answering `get_sessions` from a script; an exhausted script
    /// keeps returning an empty list.
    pub struct ScriptedAdapter {
        pub id: String,
        pub script: Mutex<VecDeque<Result<Vec<ActiveStream>, MediaServerError>>>,
        pub calls: Mutex<usize>,
    }

    impl ScriptedAdapter {
        pub fn new(
            id: &str,
            script: Vec<Result<Vec<ActiveStream>, MediaServerError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl MediaServerAdapter for ScriptedAdapter {
        fn server_id(&self) -> &str {
            &self.id
        }

        fn server_type(&self) -> ServerType {
            ServerType::Jellyfin
        }

        async fn test_connection(&self) -> Result<(), MediaServerError> {
            Ok(())
        }

        async fn get_sessions(&self) -> Result<Vec<ActiveStream>, MediaServerError> {
            *self.calls.lock().unwrap() += 1;
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn get_libraries(&self) -> Result<Vec<Library>, MediaServerError> {
            Ok(Vec::new())
        }

        async fn get_library_items(
            &self,
            _library_id: &str,
            _offset: usize,
            _limit: usize,
        ) -> Result<Vec<LibraryItem>, MediaServerError> {
            Ok(Vec::new())
        }

        async fn get_item_details(
            &self,
            _item_id: &str,
        ) -> Result<Option<ItemDetails>, MediaServerError> {
            Ok(None)
        }

        async fn get_recently_added(
            &self,
            _limit: usize,
        ) -> Result<Vec<LibraryItem>, MediaServerError> {
            Ok(Vec::new())
        }
    }

    pub fn registry_with(id: &str) -> Arc<HealthRegistry> {
        let health = Arc::new(HealthRegistry::new());
        health.register(&ServerConnection {
            id: id.to_string(),
            server_type: ServerType::Jellyfin,
            base_url: "http://localhost".to_string(),
            credential: String::new(),
            enabled: true,
        });
        health
    }

    fn poller(adapter: Arc<ScriptedAdapter>, health: Arc<HealthRegistry>) -> Poller {
        Poller::new(adapter, Duration::from_secs(10), Arc::new(Notify::new()), health)
    }

    #[tokio::test]
    async fn classifies_failures() {
        let adapter = ScriptedAdapter::new(
            "jf",
            vec![
                Ok(vec![ActiveStream {
                    server_id: "jf".to_string(),
                    session_id: "1".to_string(),
                    ..Default::default()
                }]),
                Err(MediaServerError::Timeout {
                    url: "http://jf/Sessions".to_string(),
                }),
                Err(MediaServerError::Unauthorized {
                    status: reqwest::StatusCode::UNAUTHORIZED,
                }),
                Err(MediaServerError::decode("expected array")),
            ],
        );
        let health = registry_with("jf");
        let poller = poller(adapter, health.clone());

        let snapshot = poller.poll_once().await;
        assert!(matches!(&snapshot.outcome, SnapshotOutcome::Sessions(s) if s.len() == 1));
        assert_eq!(health.get("jf").unwrap().status, HealthStatus::Ok);

        let snapshot = poller.poll_once().await;
        assert_eq!(snapshot.outcome, SnapshotOutcome::Unavailable);
        assert_eq!(health.get("jf").unwrap().status, HealthStatus::Unreachable);

        let snapshot = poller.poll_once().await;
        assert_eq!(snapshot.outcome, SnapshotOutcome::Sessions(Vec::new()));
        assert_eq!(
            health.get("jf").unwrap().status,
            HealthStatus::NeedsAttention
        );

        let snapshot = poller.poll_once().await;
        assert_eq!(snapshot.outcome, SnapshotOutcome::Sessions(Vec::new()));
        assert_eq!(health.get("jf").unwrap().status, HealthStatus::DecodeError);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_polls_out_of_cycle_and_cancel_stops() {
        let adapter = ScriptedAdapter::new("jf", Vec::new());
        let refresh = Arc::new(Notify::new());
        let poller = Poller::new(
            adapter.clone(),
            Duration::from_secs(10),
            refresh.clone(),
            registry_with("jf"),
        );
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let task = tokio::spawn(poller.run(tx, cancel.clone()));

        // first tick fires immediately
        assert!(matches!(rx.recv().await, Some(HubMessage::Snapshot(_))));

        tokio::time::sleep(Duration::from_secs(2)).await;
        refresh.notify_one();
        assert!(matches!(rx.recv().await, Some(HubMessage::Snapshot(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(*adapter.calls.lock().unwrap(), 2);

        cancel.cancel();
        task.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
