use std::collections::BTreeMap;

use log::debug;
use media_server::{models::PlaybackState, ActiveStream};
use notify_stream::{NotificationState, PlaybackNotification};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOrigin {
    Poll,
    Push,
}

/// Consolidated view after one change, as sent to dashboard subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct LiveUpdate {
    pub origin: UpdateOrigin,
    pub server_id: String,
    pub streams: Vec<ActiveStream>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// State and position of a known session were updated.
    Applied,
    /// The session stopped and left the live view.
    Removed,
    /// No such session in the view yet; the server should be polled.
    Unknown,
    /// A stop for a session the view never had.
    Ignored,
}

/// Merges poll snapshots and push notifications into one view and fans every
/// change out over a broadcast channel. Lagging receivers miss updates
/// instead of holding up the others.
pub struct LiveCoordinator {
    streams: RwLock<BTreeMap<(String, String), ActiveStream>>,
    sender: broadcast::Sender<LiveUpdate>,
    receiver: broadcast::Receiver<LiveUpdate>,
}

impl Default for LiveCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveCoordinator {
    pub fn new() -> Self {
        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            streams: RwLock::new(BTreeMap::new()),
            sender,
            receiver,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveUpdate> {
        self.receiver.resubscribe()
    }

    pub async fn streams(&self) -> Vec<ActiveStream> {
        self.streams.read().await.values().cloned().collect()
    }

    /// Replaces everything known about `server_id` with the polled streams.
    pub async fn apply_snapshot(&self, server_id: &str, streams: Vec<ActiveStream>) {
        let view = {
            let mut guard = self.streams.write().await;
            guard.retain(|(server, _), _| server != server_id);
            for stream in streams {
                guard.insert(stream.key(), stream);
            }
            guard.values().cloned().collect()
        };
        self.publish(UpdateOrigin::Poll, server_id, view);
    }

    pub async fn apply_push(
        &self,
        server_id: &str,
        notification: &PlaybackNotification,
    ) -> PushOutcome {
        let key = (server_id.to_string(), notification.session_key.clone());
        let (outcome, view) = {
            let mut guard = self.streams.write().await;
            let stopped = notification.state == NotificationState::Stopped;
            let outcome = match guard
                .get(&key)
                .map(|stream| stream.item_id == notification.item_key)
            {
                None if stopped => PushOutcome::Ignored,
                None => PushOutcome::Unknown,
                // the client moved on to another item in the same session
                Some(false) => PushOutcome::Unknown,
                Some(true) if stopped => {
                    guard.remove(&key);
                    PushOutcome::Removed
                }
                Some(true) => {
                    if let Some(stream) = guard.get_mut(&key) {
                        stream.state = match notification.state {
                            NotificationState::Paused => PlaybackState::Paused,
                            NotificationState::Buffering => PlaybackState::Buffering,
                            _ => PlaybackState::Playing,
                        };
                        stream.progress_ms = notification.view_offset_ms;
                    }
                    PushOutcome::Applied
                }
            };
            let view: Vec<ActiveStream> = match outcome {
                PushOutcome::Applied | PushOutcome::Removed => guard.values().cloned().collect(),
                _ => Vec::new(),
            };
            (outcome, view)
        };

        debug!(
            "[{}]Push for session {}: {:?}",
            server_id, notification.session_key, outcome
        );
        if matches!(outcome, PushOutcome::Applied | PushOutcome::Removed) {
            self.publish(UpdateOrigin::Push, server_id, view);
        }
        outcome
    }

    fn publish(&self, origin: UpdateOrigin, server_id: &str, streams: Vec<ActiveStream>) {
        // no subscriber is not an error
        let _ = self.sender.send(LiveUpdate {
            origin,
            server_id: server_id.to_string(),
            streams,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(server_id: &str, session_id: &str, item_id: &str) -> ActiveStream {
        ActiveStream {
            server_id: server_id.to_string(),
            session_id: session_id.to_string(),
            item_id: item_id.to_string(),
            progress_ms: 1_000,
            ..Default::default()
        }
    }

    fn push(session_key: &str, item_key: &str, state: NotificationState, offset: u64) -> PlaybackNotification {
        PlaybackNotification {
            session_key: session_key.to_string(),
            item_key: item_key.to_string(),
            state,
            view_offset_ms: offset,
        }
    }

    #[tokio::test]
    async fn snapshot_replaces_only_its_server() {
        let live = LiveCoordinator::new();
        live.apply_snapshot("a", vec![stream("a", "1", "x"), stream("a", "2", "y")]).await;
        live.apply_snapshot("b", vec![stream("b", "1", "z")]).await;
        live.apply_snapshot("a", vec![stream("a", "2", "y")]).await;

        let keys: Vec<(String, String)> = live.streams().await.iter().map(|s| s.key()).collect();
        assert_eq!(
            keys,
            vec![
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "1".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn push_updates_known_sessions() {
        let live = LiveCoordinator::new();
        live.apply_snapshot("plex", vec![stream("plex", "12", "500")]).await;
        let mut rx = live.subscribe();

        let outcome = live
            .apply_push("plex", &push("12", "500", NotificationState::Paused, 90_000))
            .await;
        assert_eq!(outcome, PushOutcome::Applied);
        let update = rx.recv().await.unwrap();
        assert_eq!(update.origin, UpdateOrigin::Push);
        assert_eq!(update.streams[0].state, PlaybackState::Paused);
        assert_eq!(update.streams[0].progress_ms, 90_000);

        let outcome = live
            .apply_push("plex", &push("12", "500", NotificationState::Stopped, 90_000))
            .await;
        assert_eq!(outcome, PushOutcome::Removed);
        assert!(rx.recv().await.unwrap().streams.is_empty());
        assert!(live.streams().await.is_empty());
    }

    #[tokio::test]
    async fn push_for_unknown_session_asks_for_poll() {
        let live = LiveCoordinator::new();
        live.apply_snapshot("plex", vec![stream("plex", "12", "500")]).await;
        let mut rx = live.subscribe();

        assert_eq!(
            live.apply_push("plex", &push("99", "1", NotificationState::Playing, 0)).await,
            PushOutcome::Unknown
        );
        assert_eq!(
            live.apply_push("plex", &push("12", "501", NotificationState::Playing, 0)).await,
            PushOutcome::Unknown
        );
        assert_eq!(
            live.apply_push("plex", &push("98", "1", NotificationState::Stopped, 0)).await,
            PushOutcome::Ignored
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_others() {
        let live = LiveCoordinator::new();
        let mut slow = live.subscribe();
        let mut fast = live.subscribe();

        for i in 0..(CHANNEL_CAPACITY + 10) {
            live.apply_snapshot("a", vec![stream("a", &i.to_string(), "x")]).await;
            let update = fast.recv().await.unwrap();
            assert_eq!(update.streams[0].session_id, i.to_string());
        }

        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        // after the lag the slow one continues with what is still buffered
        assert!(slow.recv().await.is_ok());
    }
}
