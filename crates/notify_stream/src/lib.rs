pub mod backoff;
pub mod notify_stream;
pub mod provider;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::notify_stream::NotifyStream;

#[derive(Error, Debug)]
pub enum NotifyStreamError {
    #[error("ParseError {0:?}")]
    ParseError(#[from] url::ParseError),
    #[error("UnsupportedScheme {scheme}")]
    UnsupportedScheme { scheme: String },
    #[error("WebsocketError {err}")]
    WebsocketError { err: String },
    #[error("ConnectTimeout {url}")]
    ConnectTimeout { url: String },
    #[error("ReadTimeout no frame within {after:?}")]
    ReadTimeout { after: std::time::Duration },
    #[error("MessageParseError {err}")]
    MessageParseError { err: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationState {
    Playing,
    Paused,
    Buffering,
    Stopped,
}

/// Coarse playback change pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackNotification {
    pub session_key: String,
    pub item_key: String,
    pub state: NotificationState,
    /// position in milliseconds
    pub view_offset_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}
