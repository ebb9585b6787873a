//! Turns per-server session snapshots into lifecycle events.
//!
//! A session is started the first poll it shows up in and ended the first
//! poll of the same server it is missing from. A server whose poll failed on
//! connectivity sends [`SnapshotOutcome::Unavailable`] and keeps its sessions
//! untouched for that cycle.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use log::{info, warn};
use media_server::ActiveStream;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    Sessions(Vec<ActiveStream>),
    /// The server could not be reached; nothing is known about its sessions.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSnapshot {
    pub server_id: String,
    pub taken_at: DateTime<Utc>,
    pub outcome: SnapshotOutcome,
}

impl ServerSnapshot {
    pub fn sessions(server_id: &str, streams: Vec<ActiveStream>) -> Self {
        Self {
            server_id: server_id.to_string(),
            taken_at: Utc::now(),
            outcome: SnapshotOutcome::Sessions(streams),
        }
    }

    pub fn unavailable(server_id: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            taken_at: Utc::now(),
            outcome: SnapshotOutcome::Unavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "stream", rename_all = "lowercase")]
pub enum SessionEvent {
    Started(ActiveStream),
    /// Carries the last known state of the session.
    Ended(ActiveStream),
}

impl SessionEvent {
    pub fn stream(&self) -> &ActiveStream {
        match self {
            SessionEvent::Started(stream) | SessionEvent::Ended(stream) => stream,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Started(_) => "session.started",
            SessionEvent::Ended(_) => "session.ended",
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct Reconciled {
    /// Tracked sessions of the snapshot's server after this cycle.
    pub streams: Vec<ActiveStream>,
    pub events: Vec<SessionEvent>,
}

#[derive(Default)]
pub struct SessionReconciler {
    servers: HashMap<String, BTreeMap<String, ActiveStream>>,
}

impl SessionReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconcile(&mut self, snapshot: ServerSnapshot) -> Reconciled {
        let ServerSnapshot {
            server_id,
            taken_at,
            outcome,
        } = snapshot;

        let current = match outcome {
            SnapshotOutcome::Sessions(streams) => streams,
            SnapshotOutcome::Unavailable => {
                return Reconciled {
                    streams: self.active(&server_id),
                    events: Vec::new(),
                };
            }
        };

        let mut previous = self.servers.remove(&server_id).unwrap_or_default();
        let mut tracked = BTreeMap::new();
        let mut events = Vec::new();

        for mut stream in current {
            if stream.server_id != server_id {
                warn!(
                    "[{}]Dropping session {} tagged with server {}",
                    server_id, stream.session_id, stream.server_id
                );
                continue;
            }
            if tracked.contains_key(&stream.session_id) {
                warn!(
                    "[{}]Session {} reported twice, keeping the last entry",
                    server_id, stream.session_id
                );
            }

            stream.last_seen_at = Some(taken_at);
            let known = previous
                .remove(&stream.session_id)
                .or_else(|| tracked.remove(&stream.session_id));
            match known {
                Some(prev) if prev.item_id == stream.item_id => {
                    stream.started_at = prev.started_at;
                    stream.progress_ms = stream.progress_ms.max(prev.progress_ms);
                }
                Some(prev) => {
                    // the session id outlives one item on autoplay
                    info!(
                        "[{}]Session {} moved from item {} to {}",
                        server_id, stream.session_id, prev.item_id, stream.item_id
                    );
                    events.push(SessionEvent::Ended(prev));
                    stream.started_at = Some(taken_at);
                    events.push(SessionEvent::Started(stream.clone()));
                }
                None => {
                    stream.started_at = Some(taken_at);
                    info!(
                        "[{}]Session started: {} ({})",
                        server_id, stream.session_id, stream.title
                    );
                    events.push(SessionEvent::Started(stream.clone()));
                }
            }
            tracked.insert(stream.session_id.clone(), stream);
        }

        for (session_id, stream) in previous {
            info!(
                "[{}]Session ended: {} ({}) at {}ms",
                server_id, session_id, stream.title, stream.progress_ms
            );
            events.push(SessionEvent::Ended(stream));
        }

        let streams = tracked.values().cloned().collect();
        self.servers.insert(server_id, tracked);
        Reconciled { streams, events }
    }

    pub fn active(&self, server_id: &str) -> Vec<ActiveStream> {
        self.servers
            .get(server_id)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn active_count(&self) -> usize {
        self.servers.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn stream(server_id: &str, session_id: &str, progress_ms: u64) -> ActiveStream {
        ActiveStream {
            server_id: server_id.to_string(),
            session_id: session_id.to_string(),
            item_id: format!("item-{}", session_id),
            title: format!("Title {}", session_id),
            duration_ms: 1_000_000,
            progress_ms,
            ..Default::default()
        }
    }

    fn time(secs: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::seconds(secs)
    }

    fn at(snapshot: ServerSnapshot, secs: i64) -> ServerSnapshot {
        ServerSnapshot {
            taken_at: time(secs),
            ..snapshot
        }
    }

    fn kinds(events: &[SessionEvent]) -> Vec<(&'static str, String)> {
        events
            .iter()
            .map(|e| (e.name(), e.stream().session_id.clone()))
            .collect()
    }

    #[test]
    fn started_once_then_ended_once() {
        let mut reconciler = SessionReconciler::new();

        let r = reconciler.reconcile(at(ServerSnapshot::sessions("a", vec![stream("a", "1", 10)]), 0));
        assert_eq!(kinds(&r.events), vec![("session.started", "1".to_string())]);

        for (i, progress) in [20, 30].into_iter().enumerate() {
            let r = reconciler.reconcile(at(
                ServerSnapshot::sessions("a", vec![stream("a", "1", progress)]),
                10 * (i as i64 + 1),
            ));
            assert!(r.events.is_empty());
        }

        let r = reconciler.reconcile(at(ServerSnapshot::sessions("a", vec![]), 30));
        assert_eq!(kinds(&r.events), vec![("session.ended", "1".to_string())]);
        let ended = r.events[0].stream();
        assert_eq!(ended.progress_ms, 30);
        assert_eq!(ended.duration_ms, 1_000_000);
        assert_eq!(ended.started_at, Some(time(0)));
        assert_eq!(ended.last_seen_at, Some(time(20)));

        let r = reconciler.reconcile(at(ServerSnapshot::sessions("a", vec![]), 40));
        assert!(r.events.is_empty());
        assert_eq!(reconciler.active_count(), 0);
    }

    #[test]
    fn keeps_start_time_and_monotonic_progress() {
        let mut reconciler = SessionReconciler::new();
        reconciler.reconcile(at(ServerSnapshot::sessions("a", vec![stream("a", "1", 500)]), 0));
        let r = reconciler.reconcile(at(ServerSnapshot::sessions("a", vec![stream("a", "1", 200)]), 10));

        let tracked = &r.streams[0];
        assert_eq!(tracked.progress_ms, 500);
        assert_eq!(tracked.started_at, Some(time(0)));
        assert_eq!(tracked.last_seen_at, Some(time(10)));
    }

    #[test]
    fn item_change_on_same_session_ends_and_restarts() {
        let mut reconciler = SessionReconciler::new();
        let mut episode1 = stream("a", "1", 2_650_000);
        episode1.item_id = "ep1".to_string();
        episode1.duration_ms = 2_700_000;
        reconciler.reconcile(at(ServerSnapshot::sessions("a", vec![episode1]), 0));

        let mut episode2 = stream("a", "1", 5_000);
        episode2.item_id = "ep2".to_string();
        episode2.duration_ms = 1_300_000;
        let r = reconciler.reconcile(at(ServerSnapshot::sessions("a", vec![episode2]), 10));

        assert_eq!(
            kinds(&r.events),
            vec![
                ("session.ended", "1".to_string()),
                ("session.started", "1".to_string())
            ]
        );
        assert_eq!(r.events[0].stream().item_id, "ep1");
        assert_eq!(r.events[0].stream().progress_ms, 2_650_000);

        let tracked = &r.streams[0];
        assert_eq!(tracked.item_id, "ep2");
        assert_eq!(tracked.progress_ms, 5_000);
        assert!(tracked.progress_ms <= tracked.duration_ms);
        assert_eq!(tracked.started_at, Some(time(10)));
    }

    #[test]
    fn paused_session_stays_active() {
        let mut reconciler = SessionReconciler::new();
        reconciler.reconcile(ServerSnapshot::sessions("a", vec![stream("a", "1", 5)]));
        let mut paused = stream("a", "1", 5);
        paused.state = media_server::models::PlaybackState::Paused;
        let r = reconciler.reconcile(ServerSnapshot::sessions("a", vec![paused]));
        assert!(r.events.is_empty());
        assert_eq!(reconciler.active_count(), 1);
    }

    #[test]
    fn unreachable_server_does_not_touch_others() {
        let mut reconciler = SessionReconciler::new();
        reconciler.reconcile(ServerSnapshot::sessions("a", vec![stream("a", "1", 0)]));
        reconciler.reconcile(ServerSnapshot::sessions(
            "b",
            vec![stream("b", "1", 0), stream("b", "2", 0)],
        ));

        // a is down this cycle, b lost one session
        let r = reconciler.reconcile(ServerSnapshot::unavailable("a"));
        assert!(r.events.is_empty());
        assert_eq!(r.streams.len(), 1);

        let r = reconciler.reconcile(ServerSnapshot::sessions("b", vec![stream("b", "2", 10)]));
        assert_eq!(kinds(&r.events), vec![("session.ended", "1".to_string())]);
        assert_eq!(r.events[0].stream().server_id, "b");

        assert_eq!(reconciler.active("a").len(), 1);
        assert_eq!(reconciler.active("b").len(), 1);

        // a comes back with the same session: no new start
        let r = reconciler.reconcile(ServerSnapshot::sessions("a", vec![stream("a", "1", 50)]));
        assert!(r.events.is_empty());
    }

    #[test]
    fn same_session_id_on_two_servers_is_two_sessions() {
        let mut reconciler = SessionReconciler::new();
        let ra = reconciler.reconcile(ServerSnapshot::sessions("a", vec![stream("a", "7", 0)]));
        let rb = reconciler.reconcile(ServerSnapshot::sessions("b", vec![stream("b", "7", 0)]));
        assert_eq!(ra.events.len(), 1);
        assert_eq!(rb.events.len(), 1);
        assert_eq!(reconciler.active_count(), 2);
    }

    #[test]
    fn duplicate_entries_collapse_to_one() {
        let mut reconciler = SessionReconciler::new();
        let r = reconciler.reconcile(ServerSnapshot::sessions(
            "a",
            vec![stream("a", "1", 10), stream("a", "1", 40)],
        ));
        assert_eq!(r.events.len(), 1);
        assert_eq!(r.streams.len(), 1);
        assert_eq!(r.streams[0].progress_ms, 40);
    }

    #[test]
    fn mistagged_streams_are_dropped() {
        let mut reconciler = SessionReconciler::new();
        let r = reconciler.reconcile(ServerSnapshot::sessions("a", vec![stream("b", "1", 0)]));
        assert!(r.events.is_empty());
        assert!(r.streams.is_empty());
    }
}
