mod plex;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

pub use crate::provider::plex::{notification_url, parse_notification, PlexNotify};
use crate::{ConnectionState, NotifyStreamError, PlaybackNotification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Plex,
}

#[async_trait]
pub trait NotifyProvider: Send + Sync {
    /// Label used as log prefix.
    fn name(&self) -> &str;

    /// Opens one connection and forwards notifications into `tx` until the
    /// connection drops. Sets `state` to [`ConnectionState::Connected`] once
    /// the handshake completed; `Ok(())` means the peer closed normally.
    async fn connect_and_handle(
        &self,
        tx: mpsc::Sender<PlaybackNotification>,
        state: &watch::Sender<ConnectionState>,
    ) -> Result<(), NotifyStreamError>;
}

/// Creates a notification provider for the given server flavour.
///
/// * `base_url` - http(s) base url of the server, rewritten to ws(s)
/// * `token` - access token appended to the subscription url
/// * `keepalive` - interval between liveness probes on an open connection
pub fn new(
    provider_type: ProviderType,
    name: &str,
    base_url: &str,
    token: &str,
    keepalive: Duration,
) -> Result<Box<dyn NotifyProvider>, NotifyStreamError> {
    match provider_type {
        ProviderType::Plex => {
            let plex = PlexNotify::new(name, base_url, token, keepalive)?;
            Ok(Box::new(plex))
        }
    }
}
