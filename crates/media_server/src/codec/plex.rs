//! Plex markup codec.
//!
//! Plex reports milliseconds and kilobits. While a transcode is running the
//! `Media` element of a session describes the transcoder output, so the
//! session decoder also hands back whatever source hints the
//! `TranscodeSession` element carries.

use log::warn;

use super::normalize::{
    is_hw_accelerated, kbps_to_bps, media_type_from, non_empty, normalize_resolution,
    parse_decision, parse_f64, parse_u32, parse_u64, resolution_from_height,
};
use super::xml::{parse_document, Element};
use crate::errors::MediaServerError;
use crate::models::{
    ActiveStream, ItemDetails, Library, LibraryItem, MediaType, PlaybackState, SourceMediaInfo,
    StreamDecision,
};

const SESSION_ELEMENTS: [&str; 2] = ["Video", "Track"];
const ITEM_ELEMENTS: [&str; 3] = ["Video", "Track", "Directory"];

/// Subtitle streams carry `streamType="3"`.
const SUBTITLE_STREAM_TYPE: &str = "3";

#[derive(Debug, Clone, PartialEq)]
pub struct PlexSession {
    pub stream: ActiveStream,
    /// `sourceVideoCodec` / `sourceAudioCodec` from the transcode element.
    pub source_hints: SourceMediaInfo,
}

/// Decodes `/status/sessions`. Entries without a session key or item key are
/// skipped; only a broken document fails the call.
pub fn decode_sessions(xml: &str, server_id: &str) -> Result<Vec<PlexSession>, MediaServerError> {
    let root = parse_document(xml)?;
    let sessions = root
        .children
        .iter()
        .filter(|el| SESSION_ELEMENTS.contains(&el.name.as_str()))
        .filter_map(|el| {
            let session = decode_session(el, server_id);
            if session.is_none() {
                warn!(
                    "[{}]Skipping plex session entry without identity: {:?}",
                    server_id,
                    el.attr("title")
                );
            }
            session
        })
        .collect();
    Ok(sessions)
}

fn decode_session(el: &Element, server_id: &str) -> Option<PlexSession> {
    let session_id = non_empty(el.attr("sessionKey"))?;
    let item_id = non_empty(el.attr("ratingKey"))?;

    let media = selected_media(el);
    let source = media.map(media_info).unwrap_or_default();
    let player = el.child("Player");

    let mut stream = ActiveStream {
        session_id,
        server_id: server_id.to_string(),
        item_id,
        grandparent_item_id: non_empty(el.attr("grandparentRatingKey")),
        media_type: item_media_type(el),
        title: el.attr("title").unwrap_or_default().to_string(),
        parent_title: non_empty(el.attr("parentTitle")),
        grandparent_title: non_empty(el.attr("grandparentTitle")),
        season_number: parse_u32(el.attr("parentIndex")),
        episode_number: parse_u32(el.attr("index")),
        year: parse_u32(el.attr("year")),
        duration_ms: parse_u64(el.attr("duration")).unwrap_or_default(),
        progress_ms: parse_u64(el.attr("viewOffset")).unwrap_or_default(),
        state: player
            .and_then(|p| p.attr("state"))
            .map(playback_state)
            .unwrap_or_default(),
        user_name: el.child("User").and_then(|u| non_empty(u.attr("title"))),
        player: player.and_then(|p| non_empty(p.attr("title"))),
        platform: player.and_then(|p| non_empty(p.attr("platform").or(p.attr("product")))),
        ip_address: player.and_then(|p| non_empty(p.attr("address"))),
        container: source.container,
        video_codec: source.video_codec,
        audio_codec: source.audio_codec,
        subtitle_codec: media.and_then(selected_subtitle_codec),
        video_resolution: source.video_resolution,
        bitrate: source.bitrate,
        audio_channels: source.audio_channels,
        ..Default::default()
    };

    let mut source_hints = SourceMediaInfo::default();
    if let Some(transcode) = el.child("TranscodeSession") {
        stream.video_decision = parse_decision(transcode.attr("videoDecision"));
        stream.audio_decision = parse_decision(transcode.attr("audioDecision"));
        apply_transcode(&mut stream, transcode);
        source_hints.video_codec = non_empty(transcode.attr("sourceVideoCodec"));
        source_hints.audio_codec = non_empty(transcode.attr("sourceAudioCodec"));
    }

    Some(PlexSession {
        stream,
        source_hints,
    })
}

fn apply_transcode(stream: &mut ActiveStream, transcode: &Element) {
    if !stream.is_transcoding() {
        return;
    }
    stream.transcode_progress = parse_f64(transcode.attr("progress"));
    stream.transcode_hw_decode = is_hw_accelerated(transcode.attr("transcodeHwDecoding"));
    stream.transcode_hw_encode = is_hw_accelerated(transcode.attr("transcodeHwEncoding"));
    stream.transcode_container = non_empty(transcode.attr("container"));
    if stream.video_decision == StreamDecision::Transcode {
        stream.transcode_video_codec = non_empty(transcode.attr("videoCodec"));
        stream.transcode_video_resolution =
            resolution_from_height(parse_u32(transcode.attr("height")));
    }
    if stream.audio_decision == StreamDecision::Transcode {
        stream.transcode_audio_codec = non_empty(transcode.attr("audioCodec"));
    }
}

fn item_media_type(el: &Element) -> MediaType {
    if el.attr("live") == Some("1") {
        return MediaType::LiveTv;
    }
    match el.attr("type") {
        Some(t) => media_type_from(t),
        None if el.name == "Track" => MediaType::Track,
        None => MediaType::Unknown,
    }
}

fn playback_state(raw: &str) -> PlaybackState {
    match raw {
        "paused" => PlaybackState::Paused,
        "buffering" => PlaybackState::Buffering,
        _ => PlaybackState::Playing,
    }
}

fn selected_media(el: &Element) -> Option<&Element> {
    el.children_named("Media")
        .find(|m| m.attr("selected") == Some("1"))
        .or_else(|| el.child("Media"))
}

fn selected_subtitle_codec(media: &Element) -> Option<String> {
    media
        .children_named("Part")
        .flat_map(|part| part.children_named("Stream"))
        .find(|s| {
            s.attr("streamType") == Some(SUBTITLE_STREAM_TYPE) && s.attr("selected") == Some("1")
        })
        .and_then(|s| non_empty(s.attr("codec")))
}

/// Characteristics of one `Media` element, bitrate scaled to bits/sec.
fn media_info(media: &Element) -> SourceMediaInfo {
    let video_resolution = media
        .attr("videoResolution")
        .and_then(normalize_resolution)
        .or_else(|| resolution_from_height(parse_u32(media.attr("height"))));
    SourceMediaInfo {
        video_codec: non_empty(media.attr("videoCodec")),
        audio_codec: non_empty(media.attr("audioCodec")),
        video_resolution,
        bitrate: parse_u64(media.attr("bitrate")).map(kbps_to_bps),
        container: non_empty(media.attr("container")),
        audio_channels: parse_u32(media.attr("audioChannels")),
    }
}

/// Decodes `/library/metadata/{id}` into the first media variant's characteristics.
pub fn decode_source_media(xml: &str) -> Result<Option<SourceMediaInfo>, MediaServerError> {
    let root = parse_document(xml)?;
    let media = root
        .children
        .iter()
        .filter(|el| ITEM_ELEMENTS.contains(&el.name.as_str()))
        .find_map(|el| el.child("Media"));
    Ok(media.map(media_info).filter(|info| {
        info.video_codec.is_some() || info.audio_codec.is_some() || info.bitrate.is_some()
    }))
}

pub fn decode_libraries(xml: &str) -> Result<Vec<Library>, MediaServerError> {
    let root = parse_document(xml)?;
    Ok(root
        .children_named("Directory")
        .filter_map(|dir| {
            Some(Library {
                id: non_empty(dir.attr("key"))?,
                name: dir.attr("title").unwrap_or_default().to_string(),
                library_type: dir.attr("type").unwrap_or_default().to_string(),
                item_count: parse_u64(dir.attr("count")),
            })
        })
        .collect())
}

pub fn decode_items(xml: &str, library_id: Option<&str>) -> Result<Vec<LibraryItem>, MediaServerError> {
    let root = parse_document(xml)?;
    let container_library = non_empty(root.attr("librarySectionID"));
    Ok(root
        .children
        .iter()
        .filter(|el| ITEM_ELEMENTS.contains(&el.name.as_str()))
        .filter_map(|el| {
            let mut item = decode_item(el)?;
            if item.library_id.is_none() {
                item.library_id = library_id
                    .map(str::to_string)
                    .or_else(|| container_library.clone());
            }
            Some(item)
        })
        .collect())
}

pub fn decode_item_details(xml: &str) -> Result<Option<ItemDetails>, MediaServerError> {
    let root = parse_document(xml)?;
    let Some(el) = root
        .children
        .iter()
        .find(|el| ITEM_ELEMENTS.contains(&el.name.as_str()))
    else {
        return Ok(None);
    };
    let Some(item) = decode_item(el) else {
        return Ok(None);
    };
    Ok(Some(ItemDetails {
        item,
        summary: non_empty(el.attr("summary")),
        genres: el
            .children_named("Genre")
            .filter_map(|g| non_empty(g.attr("tag")))
            .collect(),
        source: el.child("Media").map(media_info),
    }))
}

fn decode_item(el: &Element) -> Option<LibraryItem> {
    let id = non_empty(el.attr("ratingKey"))?;
    let media = el.child("Media").map(media_info).unwrap_or_default();
    Some(LibraryItem {
        id,
        library_id: non_empty(el.attr("librarySectionID")),
        media_type: item_media_type(el),
        title: el.attr("title").unwrap_or_default().to_string(),
        parent_title: non_empty(el.attr("parentTitle")),
        grandparent_title: non_empty(el.attr("grandparentTitle")),
        grandparent_item_id: non_empty(el.attr("grandparentRatingKey")),
        season_number: parse_u32(el.attr("parentIndex")),
        episode_number: parse_u32(el.attr("index")),
        year: parse_u32(el.attr("year")),
        duration_ms: parse_u64(el.attr("duration")),
        video_resolution: media.video_resolution,
        video_codec: media.video_codec,
        audio_codec: media.audio_codec,
        container: media.container,
        bitrate: media.bitrate,
        added_at: parse_u64(el.attr("addedAt")).map(|v| v as i64),
        updated_at: parse_u64(el.attr("updatedAt")).map(|v| v as i64),
    })
}
