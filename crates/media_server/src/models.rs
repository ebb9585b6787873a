use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    Plex,
    Jellyfin,
    Emby,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::Plex => "plex",
            ServerType::Jellyfin => "jellyfin",
            ServerType::Emby => "emby",
        }
    }

    /// Only Plex exposes a push notification endpoint.
    pub fn supports_push(&self) -> bool {
        matches!(self, ServerType::Plex)
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Movie,
    Episode,
    Track,
    LiveTv,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDecision {
    #[default]
    #[serde(rename = "directplay")]
    DirectPlay,
    Copy,
    Transcode,
}

impl fmt::Display for StreamDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamDecision::DirectPlay => f.write_str("direct play"),
            StreamDecision::Copy => f.write_str("copy"),
            StreamDecision::Transcode => f.write_str("transcode"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Playing,
    Paused,
    Buffering,
}

/// One currently playing session, identified by `(server_id, session_id)`.
///
/// Timing is always milliseconds and bitrate always bits per second, whatever
/// unit the vendor reported. `transcode_*` fields are only populated when the
/// matching decision is [`StreamDecision::Transcode`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveStream {
    pub session_id: String,
    pub server_id: String,
    pub item_id: String,
    pub grandparent_item_id: Option<String>,
    pub media_type: MediaType,
    pub title: String,
    pub parent_title: Option<String>,
    pub grandparent_title: Option<String>,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    pub year: Option<u32>,
    pub duration_ms: u64,
    pub progress_ms: u64,
    pub state: PlaybackState,
    pub user_name: Option<String>,
    pub player: Option<String>,
    pub platform: Option<String>,
    pub ip_address: Option<String>,
    pub container: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub subtitle_codec: Option<String>,
    pub video_resolution: Option<String>,
    pub bitrate: Option<u64>,
    pub audio_channels: Option<u32>,
    pub video_decision: StreamDecision,
    pub audio_decision: StreamDecision,
    pub transcode_progress: Option<f64>,
    pub transcode_hw_decode: bool,
    pub transcode_hw_encode: bool,
    pub transcode_container: Option<String>,
    pub transcode_video_codec: Option<String>,
    pub transcode_audio_codec: Option<String>,
    pub transcode_video_resolution: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl ActiveStream {
    pub fn key(&self) -> (String, String) {
        (self.server_id.clone(), self.session_id.clone())
    }

    pub fn is_transcoding(&self) -> bool {
        self.video_decision == StreamDecision::Transcode
            || self.audio_decision == StreamDecision::Transcode
    }
}

/// True source characteristics of an item, as opposed to what a transcode outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMediaInfo {
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub video_resolution: Option<String>,
    pub bitrate: Option<u64>,
    pub container: Option<String>,
    pub audio_channels: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConnection {
    pub id: String,
    #[serde(rename = "type")]
    pub server_type: ServerType,
    pub base_url: String,
    pub credential: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub id: String,
    pub name: String,
    pub library_type: String,
    pub item_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: String,
    pub library_id: Option<String>,
    pub media_type: MediaType,
    pub title: String,
    pub parent_title: Option<String>,
    pub grandparent_title: Option<String>,
    pub grandparent_item_id: Option<String>,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    pub year: Option<u32>,
    pub duration_ms: Option<u64>,
    pub video_resolution: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub container: Option<String>,
    pub bitrate: Option<u64>,
    /// Unix seconds
    pub added_at: Option<i64>,
    /// Unix seconds
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDetails {
    pub item: LibraryItem,
    pub summary: Option<String>,
    pub genres: Vec<String>,
    pub source: Option<SourceMediaInfo>,
}

/// Item id -> last update time for one library, used by the sync side to
/// find what changed between two scans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryItemCache {
    pub library_id: String,
    pub entries: HashMap<String, i64>,
}

impl LibraryItemCache {
    pub fn new(library_id: &str) -> Self {
        Self {
            library_id: library_id.to_string(),
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, item: &LibraryItem) {
        let stamp = item.updated_at.or(item.added_at).unwrap_or_default();
        self.entries.insert(item.id.clone(), stamp);
    }

    /// Ids that are new or carry a different stamp than in `previous`.
    pub fn changed_since(&self, previous: &LibraryItemCache) -> Vec<String> {
        let mut changed: Vec<String> = self
            .entries
            .iter()
            .filter(|(id, stamp)| previous.entries.get(*id) != Some(*stamp))
            .map(|(id, _)| id.clone())
            .collect();
        changed.sort();
        changed
    }

    pub fn removed_since(&self, previous: &LibraryItemCache) -> Vec<String> {
        let mut removed: Vec<String> = previous
            .entries
            .keys()
            .filter(|id| !self.entries.contains_key(*id))
            .cloned()
            .collect();
        removed.sort();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_connection_defaults_to_enabled() {
        let conn: ServerConnection = serde_json::from_str(
            r#"{"id":"a","type":"jellyfin","base_url":"http://x","credential":"k"}"#,
        )
        .unwrap();
        assert_eq!(conn.server_type, ServerType::Jellyfin);
        assert!(conn.enabled);
        assert!(serde_json::from_str::<ServerConnection>(
            r#"{"id":"a","type":"kodi","base_url":"http://x","credential":"k"}"#
        )
        .is_err());
    }

    #[test]
    fn decision_serializes_as_wire_token() {
        assert_eq!(
            serde_json::to_string(&StreamDecision::DirectPlay).unwrap(),
            "\"directplay\""
        );
        assert_eq!(StreamDecision::DirectPlay.to_string(), "direct play");
    }

    #[test]
    fn library_item_cache_diff() {
        let mut before = LibraryItemCache::new("1");
        let mut after = LibraryItemCache::new("1");
        let item = |id: &str, updated: i64| LibraryItem {
            id: id.to_string(),
            updated_at: Some(updated),
            ..Default::default()
        };
        before.insert(&item("a", 10));
        before.insert(&item("b", 10));
        after.insert(&item("a", 10));
        after.insert(&item("b", 20));
        after.insert(&item("c", 5));

        assert_eq!(after.changed_since(&before), vec!["b", "c"]);
        before.insert(&item("d", 1));
        assert_eq!(after.removed_since(&before), vec!["d"]);
    }
}
