//! JSON codec shared by Jellyfin and Emby.
//!
//! Both servers descend from the same code base: ticks for time, bits/sec for
//! bitrate and a `TranscodingInfo` object that only carries "is direct" flags.
//! The differences live behind [`Dialect`].

use chrono::DateTime;
use log::warn;
use serde::Deserialize;
use serde_json::Value;

use super::normalize::{
    decision_from_direct_flag, media_type_from, non_empty, resolution_from_height, ticks_to_ms,
};
use crate::errors::MediaServerError;
use crate::models::{
    ActiveStream, ItemDetails, Library, LibraryItem, MediaType, PlaybackState, ServerType,
    SourceMediaInfo, StreamDecision,
};

pub trait Dialect: Send + Sync + 'static {
    const SERVER_TYPE: ServerType;
    /// Prefix in front of every API route, e.g. `/emby`.
    const API_PREFIX: &'static str;

    /// `(hw_decode, hw_encode)` for one transcode.
    fn hw_acceleration(info: &TranscodingInfo) -> (bool, bool);
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionInfo {
    pub id: Option<String>,
    pub user_name: Option<String>,
    pub client: Option<String>,
    pub device_name: Option<String>,
    pub remote_end_point: Option<String>,
    pub now_playing_item: Option<BaseItem>,
    pub play_state: Option<PlayState>,
    pub transcoding_info: Option<TranscodingInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BaseItem {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "Type")]
    pub item_type: Option<String>,
    pub series_name: Option<String>,
    pub season_name: Option<String>,
    pub series_id: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub parent_index_number: Option<u32>,
    pub index_number: Option<u32>,
    pub production_year: Option<u32>,
    pub run_time_ticks: Option<i64>,
    pub container: Option<String>,
    pub bitrate: Option<u64>,
    pub overview: Option<String>,
    pub date_created: Option<String>,
    pub date_last_saved: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub media_streams: Vec<MediaStream>,
    #[serde(default)]
    pub media_sources: Vec<MediaSource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaSource {
    pub container: Option<String>,
    pub bitrate: Option<u64>,
    #[serde(default)]
    pub media_streams: Vec<MediaStream>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaStream {
    #[serde(rename = "Type")]
    pub stream_type: Option<String>,
    pub codec: Option<String>,
    pub height: Option<u32>,
    pub channels: Option<u32>,
    pub index: Option<i32>,
    pub bit_rate: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayState {
    pub position_ticks: Option<i64>,
    pub is_paused: Option<bool>,
    pub play_method: Option<String>,
    pub audio_stream_index: Option<i32>,
    pub subtitle_stream_index: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TranscodingInfo {
    pub is_video_direct: Option<bool>,
    pub is_audio_direct: Option<bool>,
    pub container: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub height: Option<u32>,
    pub completion_percentage: Option<f64>,
    pub hardware_acceleration_type: Option<String>,
    pub video_decoder_is_hardware: Option<bool>,
    pub video_encoder_is_hardware: Option<bool>,
    pub video_decoder_hw_accel: Option<String>,
    pub video_encoder_hw_accel: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VirtualFolder {
    name: Option<String>,
    item_id: Option<String>,
    collection_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsPage {
    #[serde(default)]
    items: Vec<Value>,
}

/// Decodes the `/Sessions` array. Idle clients (no now-playing item) and
/// entries that do not deserialize are skipped.
pub fn decode_sessions<D: Dialect>(
    body: &str,
    server_id: &str,
) -> Result<Vec<ActiveStream>, MediaServerError> {
    let entries: Vec<Value> = serde_json::from_str(body).map_err(MediaServerError::decode)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<SessionInfo>(entry) {
            Ok(info) => decode_session::<D>(info, server_id),
            Err(e) => {
                warn!("[{}]Skipping malformed session entry: {}", server_id, e);
                None
            }
        })
        .collect())
}

fn decode_session<D: Dialect>(info: SessionInfo, server_id: &str) -> Option<ActiveStream> {
    let item = info.now_playing_item?;
    let session_id = non_empty(info.id.as_deref())?;
    let Some(item_id) = non_empty(item.id.as_deref()) else {
        warn!(
            "[{}]Skipping session {} without item id",
            server_id, session_id
        );
        return None;
    };
    let play_state = info.play_state.unwrap_or_default();
    let transcoding = info.transcoding_info.as_ref();

    let video = find_stream(&item.media_streams, "Video", None);
    let audio = find_stream(&item.media_streams, "Audio", play_state.audio_stream_index);
    let subtitle = play_state
        .subtitle_stream_index
        .filter(|idx| *idx >= 0)
        .and_then(|idx| find_stream(&item.media_streams, "Subtitle", Some(idx)))
        .filter(|s| s.index == play_state.subtitle_stream_index);

    let media_type = item
        .item_type
        .as_deref()
        .map(media_type_from)
        .unwrap_or_default();
    let (parent_title, grandparent_title, grandparent_item_id) = match media_type {
        MediaType::Episode => (
            item.season_name.clone(),
            item.series_name.clone(),
            item.series_id.clone(),
        ),
        MediaType::Track => (item.album.clone(), item.album_artist.clone(), None),
        _ => (None, None, None),
    };

    let mut stream = ActiveStream {
        session_id,
        server_id: server_id.to_string(),
        item_id,
        grandparent_item_id,
        media_type,
        title: item.name.clone().unwrap_or_default(),
        parent_title,
        grandparent_title,
        season_number: item.parent_index_number,
        episode_number: item.index_number,
        year: item.production_year,
        duration_ms: item.run_time_ticks.map(ticks_to_ms).unwrap_or_default(),
        progress_ms: play_state
            .position_ticks
            .map(ticks_to_ms)
            .unwrap_or_default(),
        state: if play_state.is_paused.unwrap_or(false) {
            PlaybackState::Paused
        } else {
            PlaybackState::Playing
        },
        user_name: non_empty(info.user_name.as_deref()),
        player: non_empty(info.device_name.as_deref()),
        platform: non_empty(info.client.as_deref()),
        ip_address: non_empty(info.remote_end_point.as_deref()),
        container: non_empty(item.container.as_deref()),
        video_codec: video.and_then(|s| non_empty(s.codec.as_deref())),
        audio_codec: audio.and_then(|s| non_empty(s.codec.as_deref())),
        subtitle_codec: subtitle.and_then(|s| non_empty(s.codec.as_deref())),
        video_resolution: resolution_from_height(video.and_then(|s| s.height)),
        bitrate: item.bitrate.or_else(|| sum_bitrates(&item.media_streams)),
        audio_channels: audio.and_then(|s| s.channels),
        video_decision: decision_from_direct_flag(
            transcoding.is_some(),
            transcoding.and_then(|t| t.is_video_direct),
        ),
        audio_decision: decision_from_direct_flag(
            transcoding.is_some(),
            transcoding.and_then(|t| t.is_audio_direct),
        ),
        ..Default::default()
    };

    if let Some(transcode) = transcoding.filter(|_| stream.is_transcoding()) {
        let (hw_decode, hw_encode) = D::hw_acceleration(transcode);
        stream.transcode_progress = transcode.completion_percentage;
        stream.transcode_hw_decode = hw_decode;
        stream.transcode_hw_encode = hw_encode;
        stream.transcode_container = non_empty(transcode.container.as_deref());
        if stream.video_decision == StreamDecision::Transcode {
            stream.transcode_video_codec = non_empty(transcode.video_codec.as_deref());
            stream.transcode_video_resolution = resolution_from_height(transcode.height);
        }
        if stream.audio_decision == StreamDecision::Transcode {
            stream.transcode_audio_codec = non_empty(transcode.audio_codec.as_deref());
        }
    }

    Some(stream)
}

/// Stream of `kind`, preferring the one at `index` when given.
fn find_stream<'a>(
    streams: &'a [MediaStream],
    kind: &str,
    index: Option<i32>,
) -> Option<&'a MediaStream> {
    let mut of_kind = streams
        .iter()
        .filter(move |s| s.stream_type.as_deref() == Some(kind));
    match index {
        Some(idx) => of_kind
            .clone()
            .find(|s| s.index == Some(idx))
            .or_else(|| of_kind.next()),
        None => of_kind.next(),
    }
}

fn sum_bitrates(streams: &[MediaStream]) -> Option<u64> {
    let total: u64 = streams.iter().filter_map(|s| s.bit_rate).sum();
    (total > 0).then_some(total)
}

fn parse_date(raw: Option<&str>) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw?).ok().map(|d| d.timestamp())
}

fn item_source(item: &BaseItem) -> SourceMediaInfo {
    let (container, bitrate, streams) = match item.media_sources.first() {
        Some(source) => (
            source.container.as_deref().or(item.container.as_deref()),
            source.bitrate.or(item.bitrate),
            if source.media_streams.is_empty() {
                &item.media_streams
            } else {
                &source.media_streams
            },
        ),
        None => (item.container.as_deref(), item.bitrate, &item.media_streams),
    };
    let video = find_stream(streams, "Video", None);
    let audio = find_stream(streams, "Audio", None);
    SourceMediaInfo {
        video_codec: video.and_then(|s| non_empty(s.codec.as_deref())),
        audio_codec: audio.and_then(|s| non_empty(s.codec.as_deref())),
        video_resolution: resolution_from_height(video.and_then(|s| s.height)),
        bitrate: bitrate.or_else(|| sum_bitrates(streams)),
        container: non_empty(container),
        audio_channels: audio.and_then(|s| s.channels),
    }
}

fn to_library_item(item: &BaseItem, library_id: Option<&str>) -> Option<LibraryItem> {
    let id = non_empty(item.id.as_deref())?;
    let media_type = item
        .item_type
        .as_deref()
        .map(media_type_from)
        .unwrap_or_default();
    let source = item_source(item);
    let added_at = parse_date(item.date_created.as_deref());
    Some(LibraryItem {
        id,
        library_id: library_id.map(str::to_string),
        media_type,
        title: item.name.clone().unwrap_or_default(),
        parent_title: match media_type {
            MediaType::Episode => item.season_name.clone(),
            MediaType::Track => item.album.clone(),
            _ => None,
        },
        grandparent_title: match media_type {
            MediaType::Episode => item.series_name.clone(),
            MediaType::Track => item.album_artist.clone(),
            _ => None,
        },
        grandparent_item_id: item.series_id.clone(),
        season_number: item.parent_index_number,
        episode_number: item.index_number,
        year: item.production_year,
        duration_ms: item.run_time_ticks.map(ticks_to_ms),
        video_resolution: source.video_resolution,
        video_codec: source.video_codec,
        audio_codec: source.audio_codec,
        container: source.container,
        bitrate: source.bitrate,
        added_at,
        updated_at: parse_date(item.date_last_saved.as_deref()).or(added_at),
    })
}

/// Decodes `/Library/VirtualFolders`.
pub fn decode_libraries(body: &str) -> Result<Vec<Library>, MediaServerError> {
    let folders: Vec<Value> = serde_json::from_str(body).map_err(MediaServerError::decode)?;
    Ok(folders
        .into_iter()
        .filter_map(|v| serde_json::from_value::<VirtualFolder>(v).ok())
        .filter_map(|folder| {
            Some(Library {
                id: non_empty(folder.item_id.as_deref())?,
                name: folder.name.unwrap_or_default(),
                library_type: folder.collection_type.unwrap_or_else(|| "mixed".to_string()),
                item_count: None,
            })
        })
        .collect())
}

/// Decodes an `/Items` page.
pub fn decode_items(body: &str, library_id: Option<&str>) -> Result<Vec<LibraryItem>, MediaServerError> {
    Ok(decode_base_items(body)?
        .iter()
        .filter_map(|item| to_library_item(item, library_id))
        .collect())
}

pub fn decode_item_details(body: &str) -> Result<Option<ItemDetails>, MediaServerError> {
    let items = decode_base_items(body)?;
    let Some(item) = items.first() else {
        return Ok(None);
    };
    let Some(library_item) = to_library_item(item, None) else {
        return Ok(None);
    };
    let source = item_source(item);
    Ok(Some(ItemDetails {
        item: library_item,
        summary: non_empty(item.overview.as_deref()),
        genres: item.genres.clone(),
        source: Some(source),
    }))
}

fn decode_base_items(body: &str) -> Result<Vec<BaseItem>, MediaServerError> {
    let page: ItemsPage = serde_json::from_str(body).map_err(MediaServerError::decode)?;
    Ok(page
        .items
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<BaseItem>(v) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping malformed library item: {}", e);
                None
            }
        })
        .collect())
}
