pub mod http_client;
mod mediabrowser;
mod plex;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify_stream::NotifyStream;

pub use crate::adapters::mediabrowser::{EmbyAdapter, JellyfinAdapter, MediaBrowserAdapter};
pub use crate::adapters::plex::PlexAdapter;
use crate::errors::MediaServerError;
use crate::models::{
    ActiveStream, ItemDetails, Library, LibraryItem, LibraryItemCache, ServerConnection,
    ServerType,
};

/// Uniform surface over one configured media server.
#[async_trait]
pub trait MediaServerAdapter: Send + Sync {
    fn server_id(&self) -> &str;

    fn server_type(&self) -> ServerType;

    /// One authenticated round trip. Any non-success status is an error.
    async fn test_connection(&self) -> Result<(), MediaServerError>;

    /// Current sessions, normalized, with transcode sources resolved.
    async fn get_sessions(&self) -> Result<Vec<ActiveStream>, MediaServerError>;

    async fn get_libraries(&self) -> Result<Vec<Library>, MediaServerError>;

    async fn get_library_items(
        &self,
        library_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LibraryItem>, MediaServerError>;

    /// `Ok(None)` when the server does not know the item.
    async fn get_item_details(&self, item_id: &str)
        -> Result<Option<ItemDetails>, MediaServerError>;

    async fn get_recently_added(&self, limit: usize) -> Result<Vec<LibraryItem>, MediaServerError>;

    /// Push subscription for servers that offer one.
    fn subscribe(&self, _keepalive: Duration) -> Result<NotifyStream, MediaServerError> {
        Err(MediaServerError::UnsupportedOperation {
            operation: format!("subscribe ({})", self.server_type()),
        })
    }

    /// Walks every page of a library and records each item's update stamp.
    async fn get_library_item_cache(
        &self,
        library_id: &str,
        page_size: usize,
    ) -> Result<LibraryItemCache, MediaServerError> {
        let page_size = page_size.max(1);
        let mut cache = LibraryItemCache::new(library_id);
        let mut offset = 0;
        loop {
            let page = self
                .get_library_items(library_id, offset, page_size)
                .await?;
            for item in &page {
                cache.insert(item);
            }
            if page.len() < page_size {
                break;
            }
            offset += page.len();
        }
        log::debug!(
            "[{}]Library {} holds {} items",
            self.server_id(),
            library_id,
            cache.entries.len()
        );
        Ok(cache)
    }
}

/// Builds the adapter matching `connection.server_type`.
pub fn new(
    connection: &ServerConnection,
    timeout: Duration,
) -> Result<Arc<dyn MediaServerAdapter>, MediaServerError> {
    match connection.server_type {
        ServerType::Plex => Ok(Arc::new(PlexAdapter::new(connection, timeout)?)),
        ServerType::Jellyfin => Ok(Arc::new(JellyfinAdapter::new(connection, timeout)?)),
        ServerType::Emby => Ok(Arc::new(EmbyAdapter::new(connection, timeout)?)),
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    use axum::Router;

    /// Serves `app` on an ephemeral loopback port and returns its base url.
    pub async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }
}
