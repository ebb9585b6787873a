//! Routes poll snapshots and push notifications to the reconciler, the live
//! view and the history sink.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use notify_stream::PlaybackNotification;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::live::{LiveCoordinator, PushOutcome};
use crate::reconciler::{ServerSnapshot, SessionEvent, SessionReconciler, SnapshotOutcome};

#[derive(Debug)]
pub enum HubMessage {
    Snapshot(ServerSnapshot),
    Push {
        server_id: String,
        notification: PlaybackNotification,
    },
}

pub struct Hub {
    reconciler: SessionReconciler,
    live: Arc<LiveCoordinator>,
    refresh: HashMap<String, Arc<Notify>>,
    history_tx: mpsc::Sender<SessionEvent>,
}

impl Hub {
    pub fn new(
        live: Arc<LiveCoordinator>,
        refresh: HashMap<String, Arc<Notify>>,
        history_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            reconciler: SessionReconciler::new(),
            live,
            refresh,
            history_tx,
        }
    }

    pub async fn handle(&mut self, message: HubMessage) {
        match message {
            HubMessage::Snapshot(snapshot) => {
                let server_id = snapshot.server_id.clone();
                let available = snapshot.outcome != SnapshotOutcome::Unavailable;
                let reconciled = self.reconciler.reconcile(snapshot);
                if available {
                    self.live.apply_snapshot(&server_id, reconciled.streams).await;
                }
                for event in reconciled.events {
                    if self.history_tx.send(event).await.is_err() {
                        warn!("[{}]History sink is gone, dropping event", server_id);
                    }
                }
            }
            HubMessage::Push {
                server_id,
                notification,
            } => {
                if self.live.apply_push(&server_id, &notification).await == PushOutcome::Unknown {
                    if let Some(refresh) = self.refresh.get(&server_id) {
                        debug!(
                            "[{}]Unknown session {}, requesting poll",
                            server_id, notification.session_key
                        );
                        refresh.notify_one();
                    }
                }
            }
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<HubMessage>, cancel: CancellationToken) {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => message,
            };
            match message {
                Some(message) => self.handle(message).await,
                None => break,
            }
        }
        info!(
            "Hub stopped with {} tracked sessions",
            self.reconciler.active_count()
        );
    }
}
