use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;

use crate::adapters::{http_client::ApiClient, MediaServerAdapter};
use crate::codec::emby::Emby;
use crate::codec::jellyfin::Jellyfin;
use crate::codec::mediabrowser::{self as codec, Dialect};
use crate::errors::MediaServerError;
use crate::models::{
    ActiveStream, ItemDetails, Library, LibraryItem, ServerConnection, ServerType,
};

const ITEM_TYPES: &str = "Movie,Episode,Audio";
const ITEM_FIELDS: &str = "MediaSources,MediaStreams,DateCreated,DateLastSaved,Overview,Genres";

/// Adapter for the Jellyfin/Emby family. Both report the real source streams
/// next to the transcode info, so no metadata recovery is needed.
pub struct MediaBrowserAdapter<D: Dialect> {
    connection: ServerConnection,
    client: ApiClient,
    _dialect: PhantomData<D>,
}

pub type JellyfinAdapter = MediaBrowserAdapter<Jellyfin>;
pub type EmbyAdapter = MediaBrowserAdapter<Emby>;

impl<D: Dialect> MediaBrowserAdapter<D> {
    pub fn new(connection: &ServerConnection, timeout: Duration) -> Result<Self, MediaServerError> {
        let client = ApiClient::new(
            &connection.base_url,
            "x-emby-token",
            &connection.credential,
            timeout,
        )?
        .with_header("accept", "application/json");
        Ok(Self {
            connection: connection.clone(),
            client,
            _dialect: PhantomData,
        })
    }

    fn route(path: &str) -> String {
        format!("{}{}", D::API_PREFIX, path)
    }

    async fn items(&self, query: &[(&str, String)]) -> Result<String, MediaServerError> {
        self.client.get_text(&Self::route("/Items"), query).await
    }
}

#[async_trait]
impl<D: Dialect> MediaServerAdapter for MediaBrowserAdapter<D> {
    fn server_id(&self) -> &str {
        &self.connection.id
    }

    fn server_type(&self) -> ServerType {
        D::SERVER_TYPE
    }

    async fn test_connection(&self) -> Result<(), MediaServerError> {
        self.client.get(&Self::route("/System/Info"), &[]).await?;
        Ok(())
    }

    async fn get_sessions(&self) -> Result<Vec<ActiveStream>, MediaServerError> {
        let body = self.client.get_text(&Self::route("/Sessions"), &[]).await?;
        codec::decode_sessions::<D>(&body, &self.connection.id)
    }

    async fn get_libraries(&self) -> Result<Vec<Library>, MediaServerError> {
        let body = self
            .client
            .get_text(&Self::route("/Library/VirtualFolders"), &[])
            .await?;
        codec::decode_libraries(&body)
    }

    async fn get_library_items(
        &self,
        library_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LibraryItem>, MediaServerError> {
        let body = self
            .items(&[
                ("ParentId", library_id.to_string()),
                ("Recursive", "true".to_string()),
                ("IncludeItemTypes", ITEM_TYPES.to_string()),
                ("Fields", ITEM_FIELDS.to_string()),
                ("StartIndex", offset.to_string()),
                ("Limit", limit.to_string()),
            ])
            .await?;
        codec::decode_items(&body, Some(library_id))
    }

    async fn get_item_details(
        &self,
        item_id: &str,
    ) -> Result<Option<ItemDetails>, MediaServerError> {
        let body = self
            .items(&[
                ("Ids", item_id.to_string()),
                ("Fields", ITEM_FIELDS.to_string()),
            ])
            .await?;
        codec::decode_item_details(&body)
    }

    async fn get_recently_added(&self, limit: usize) -> Result<Vec<LibraryItem>, MediaServerError> {
        let body = self
            .items(&[
                ("Recursive", "true".to_string()),
                ("IncludeItemTypes", ITEM_TYPES.to_string()),
                ("Fields", ITEM_FIELDS.to_string()),
                ("SortBy", "DateCreated".to_string()),
                ("SortOrder", "Descending".to_string()),
                ("Limit", limit.to_string()),
            ])
            .await?;
        codec::decode_items(&body, None)
    }
}
