//! Sink for session lifecycle events.

pub mod webhook;

use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use media_server::ActiveStream;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::reconciler::SessionEvent;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEvent {
    pub id: String,
    pub event: String,
    pub timestamp: i64,
    pub stream: ActiveStream,
}

impl From<&SessionEvent> for HistoryEvent {
    fn from(event: &SessionEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event: event.name().to_string(),
            timestamp: Utc::now().timestamp(),
            stream: event.stream().clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error: status {status}, body: {body}")]
    Http { status: u16, body: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[async_trait]
pub trait HistoryWriter: Send + Sync {
    async fn write(&self, event: &HistoryEvent) -> Result<(), HistoryError>;
}

/// Writes events to the log only. Used when no webhook is configured.
pub struct LogHistoryWriter;

#[async_trait]
impl HistoryWriter for LogHistoryWriter {
    async fn write(&self, event: &HistoryEvent) -> Result<(), HistoryError> {
        let stream = &event.stream;
        info!(
            "[{}]{} session={} item={} title={:?} user={:?} progress={}/{}ms",
            stream.server_id,
            event.event,
            stream.session_id,
            stream.item_id,
            stream.title,
            stream.user_name,
            stream.progress_ms,
            stream.duration_ms
        );
        Ok(())
    }
}

/// Drains lifecycle events into `writer` until every sender is gone.
pub async fn run(writer: Arc<dyn HistoryWriter>, mut rx: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        let event = HistoryEvent::from(&event);
        if let Err(e) = writer.write(&event).await {
            warn!(
                "[{}]Failed to write {} for session {}: {}",
                event.stream.server_id, event.event, event.stream.session_id, e
            );
        }
    }
    info!("History writer stopped");
}
