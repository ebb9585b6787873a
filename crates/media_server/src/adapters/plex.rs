use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use notify_stream::{provider::ProviderType, NotifyStream};

use crate::adapters::{http_client::ApiClient, MediaServerAdapter};
use crate::codec::plex::{self as codec, PlexSession};
use crate::errors::MediaServerError;
use crate::models::{
    ActiveStream, ItemDetails, Library, LibraryItem, ServerConnection, ServerType,
    SourceMediaInfo,
};
use crate::recovery::{apply_source, MetadataRecoveryCache};

const PRODUCT: &str = "streamwatch";

pub struct PlexAdapter {
    connection: ServerConnection,
    client: ApiClient,
    cache: MetadataRecoveryCache,
}

impl PlexAdapter {
    async fn fetch_sessions(&self) -> Result<Vec<PlexSession>, MediaServerError> {
        let body = self.client.get_text("/status/sessions", &[]).await?;
        codec::decode_sessions(&body, &self.connection.id)
    }

    pub fn new(connection: &ServerConnection, timeout: Duration) -> Result<Self, MediaServerError> {
        let client = ApiClient::new(
            &connection.base_url,
            "x-plex-token",
            &connection.credential,
            timeout,
        )?
        .with_header("accept", "application/xml")
        .with_header("x-plex-product", PRODUCT)
        .with_header("x-plex-client-identifier", PRODUCT);
        Ok(Self {
            connection: connection.clone(),
            client,
            cache: MetadataRecoveryCache::new(),
        })
    }

    pub fn recovery_cache(&self) -> &MetadataRecoveryCache {
        &self.cache
    }

    /// True source of a transcoding item. A failed lookup is not cached so the
    /// next poll tries again.
    async fn recover_source(&self, item_id: &str) -> Option<SourceMediaInfo> {
        if let Some(info) = self.cache.get(item_id) {
            debug!("[{}]Source cache hit for item {}", self.connection.id, item_id);
            return Some(info);
        }
        debug!("[{}]Source cache miss for item {}", self.connection.id, item_id);

        match self.fetch_source(item_id).await {
            Ok(Some(info)) => {
                self.cache.insert(item_id, info.clone());
                Some(info)
            }
            Ok(None) => {
                warn!(
                    "[{}]Item {} metadata carries no media",
                    self.connection.id, item_id
                );
                None
            }
            Err(e) => {
                warn!(
                    "[{}]Failed to recover source of item {}: {}",
                    self.connection.id, item_id, e
                );
                None
            }
        }
    }

    async fn fetch_source(&self, item_id: &str) -> Result<Option<SourceMediaInfo>, MediaServerError> {
        let body = self
            .client
            .get_text(&format!("/library/metadata/{}", item_id), &[])
            .await?;
        codec::decode_source_media(&body)
    }

    fn paging(offset: usize, limit: usize) -> [(&'static str, String); 2] {
        [
            ("X-Plex-Container-Start", offset.to_string()),
            ("X-Plex-Container-Size", limit.to_string()),
        ]
    }
}

#[async_trait]
impl MediaServerAdapter for PlexAdapter {
    fn server_id(&self) -> &str {
        &self.connection.id
    }

    fn server_type(&self) -> ServerType {
        ServerType::Plex
    }

    async fn test_connection(&self) -> Result<(), MediaServerError> {
        self.client.get("/", &[]).await?;
        Ok(())
    }

    async fn get_sessions(&self) -> Result<Vec<ActiveStream>, MediaServerError> {
        let sessions = match self.fetch_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                // these end every session of the server, so nothing stays referenced
                if e.is_auth() || e.is_decode() {
                    let pruned = self.cache.prune(&HashSet::new());
                    if pruned > 0 {
                        debug!(
                            "[{}]Dropped {} source cache entries after failed poll",
                            self.connection.id, pruned
                        );
                    }
                }
                return Err(e);
            }
        };

        let mut referenced = HashSet::new();
        let mut streams = Vec::with_capacity(sessions.len());
        for PlexSession {
            mut stream,
            source_hints,
        } in sessions
        {
            referenced.insert(stream.item_id.clone());
            if stream.is_transcoding() {
                match self.recover_source(&stream.item_id).await {
                    Some(source) => apply_source(&mut stream, &source),
                    None => apply_source(&mut stream, &source_hints),
                }
            }
            streams.push(stream);
        }

        let pruned = self.cache.prune(&referenced);
        if pruned > 0 {
            debug!(
                "[{}]Pruned {} source cache entries",
                self.connection.id, pruned
            );
        }
        Ok(streams)
    }

    async fn get_libraries(&self) -> Result<Vec<Library>, MediaServerError> {
        let body = self.client.get_text("/library/sections", &[]).await?;
        codec::decode_libraries(&body)
    }

    async fn get_library_items(
        &self,
        library_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LibraryItem>, MediaServerError> {
        let body = self
            .client
            .get_text(
                &format!("/library/sections/{}/all", library_id),
                &Self::paging(offset, limit),
            )
            .await?;
        codec::decode_items(&body, Some(library_id))
    }

    async fn get_item_details(
        &self,
        item_id: &str,
    ) -> Result<Option<ItemDetails>, MediaServerError> {
        match self
            .client
            .get_text(&format!("/library/metadata/{}", item_id), &[])
            .await
        {
            Ok(body) => codec::decode_item_details(&body),
            Err(MediaServerError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_recently_added(&self, limit: usize) -> Result<Vec<LibraryItem>, MediaServerError> {
        let body = self
            .client
            .get_text("/library/recentlyAdded", &Self::paging(0, limit))
            .await?;
        codec::decode_items(&body, None)
    }

    fn subscribe(&self, keepalive: Duration) -> Result<NotifyStream, MediaServerError> {
        Ok(NotifyStream::new(
            ProviderType::Plex,
            &self.connection.id,
            &self.connection.base_url,
            &self.connection.credential,
            keepalive,
        )?)
    }
}
