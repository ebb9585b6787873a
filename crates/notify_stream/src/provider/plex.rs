use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::{
    provider::NotifyProvider, ConnectionState, NotificationState, NotifyStreamError,
    PlaybackNotification,
};

type WsReadType = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

type WsWriteType = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const NOTIFICATION_PATH: &str = "/:/websockets/notifications";

pub struct PlexNotify {
    name: String,
    url: Url,
    keepalive: Duration,
}

impl PlexNotify {
    pub fn new(
        name: &str,
        base_url: &str,
        token: &str,
        keepalive: Duration,
    ) -> Result<Self, NotifyStreamError> {
        Ok(Self {
            name: name.to_string(),
            url: notification_url(base_url, token)?,
            keepalive,
        })
    }

    async fn send_keepalive(
        mut write: WsWriteType,
        keepalive: Duration,
    ) -> Result<(), NotifyStreamError> {
        let mut ticker = interval(keepalive);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            write
                .send(Message::Ping(Default::default()))
                .await
                .map_err(|e| NotifyStreamError::WebsocketError { err: e.to_string() })?;
        }
    }

    /// Every keep-alive ping is answered, so a socket silent for two
    /// intervals is treated as dead.
    async fn recv(
        name: &str,
        mut read: WsReadType,
        tx: mpsc::Sender<PlaybackNotification>,
        keepalive: Duration,
    ) -> Result<(), NotifyStreamError> {
        let deadline = keepalive * 2;
        loop {
            let Some(msg) = timeout(deadline, read.next())
                .await
                .map_err(|_| NotifyStreamError::ReadTimeout { after: deadline })?
            else {
                break;
            };
            let msg = msg.map_err(|e| NotifyStreamError::WebsocketError { err: e.to_string() })?;
            match &msg {
                Message::Text(_) => {
                    let text = msg
                        .to_text()
                        .map_err(|e| NotifyStreamError::MessageParseError { err: e.to_string() })?;
                    match parse_notification(text) {
                        Ok(notifications) => {
                            for notification in notifications {
                                debug!("[{}]Received notification: {:?}", name, notification);
                                if tx.send(notification).await.is_err() {
                                    // nobody listens anymore
                                    return Ok(());
                                }
                            }
                        }
                        Err(e) => {
                            log::trace!("[{}]Unsupported message: {} ({})", name, text, e);
                        }
                    }
                }
                Message::Close(frame) => {
                    info!("[{}]Server closed notification socket: {:?}", name, frame);
                    return Ok(());
                }
                _ => {}
            }
        }

        Ok(())
    }
}

#[async_trait]
impl NotifyProvider for PlexNotify {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect_and_handle(
        &self,
        tx: mpsc::Sender<PlaybackNotification>,
        state: &watch::Sender<ConnectionState>,
    ) -> Result<(), NotifyStreamError> {
        let (conn, _) = timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| NotifyStreamError::ConnectTimeout {
                url: redacted(&self.url),
            })?
            .map_err(|e| NotifyStreamError::WebsocketError { err: e.to_string() })?;

        state.send_replace(ConnectionState::Connected);
        info!("[{}]Notification socket connected", self.name);

        let (write, read) = conn.split();

        tokio::select! {
            v = PlexNotify::send_keepalive(write, self.keepalive) => v,
            v = PlexNotify::recv(&self.name, read, tx, self.keepalive) => v
        }
    }
}

/// Builds the websocket subscription url from an http(s) base url.
pub fn notification_url(base_url: &str, token: &str) -> Result<Url, NotifyStreamError> {
    let mut url = Url::parse(base_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(NotifyStreamError::UnsupportedScheme {
                scheme: other.to_string(),
            })
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| NotifyStreamError::UnsupportedScheme {
            scheme: scheme.to_string(),
        })?;
    let path = format!("{}{}", url.path().trim_end_matches('/'), NOTIFICATION_PATH);
    url.set_path(&path);
    url.query_pairs_mut()
        .clear()
        .append_pair("X-Plex-Token", token);
    Ok(url)
}

fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "NotificationContainer")]
    container: Container,
}

#[derive(Deserialize)]
struct Container {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "PlaySessionStateNotification", default)]
    play_sessions: Vec<PlaySessionState>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaySessionState {
    session_key: String,
    rating_key: Option<String>,
    key: Option<String>,
    state: String,
    view_offset: Option<u64>,
}

/// Extracts playback notifications from one socket frame. Frames of any
/// other notification type yield an empty list.
pub fn parse_notification(text: &str) -> Result<Vec<PlaybackNotification>, NotifyStreamError> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| NotifyStreamError::MessageParseError { err: e.to_string() })?;
    if envelope.container.kind != "playing" {
        return Ok(Vec::new());
    }

    let mut notifications = Vec::new();
    for entry in envelope.container.play_sessions {
        let state = match entry.state.as_str() {
            "playing" => NotificationState::Playing,
            "paused" => NotificationState::Paused,
            "buffering" => NotificationState::Buffering,
            "stopped" => NotificationState::Stopped,
            other => {
                warn!("Unknown playback state in notification: {}", other);
                continue;
            }
        };
        let item_key = entry
            .rating_key
            .or_else(|| {
                entry
                    .key
                    .as_deref()
                    .and_then(|k| k.rsplit('/').next())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        notifications.push(PlaybackNotification {
            session_key: entry.session_key,
            item_key,
            state,
            view_offset_ms: entry.view_offset.unwrap_or(0),
        });
    }
    Ok(notifications)
}
