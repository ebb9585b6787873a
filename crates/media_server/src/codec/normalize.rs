//! Unit normalization shared by every codec. Everything here is pure.

use crate::models::{MediaType, StreamDecision};

/// 100ns ticks per millisecond.
pub const TICKS_PER_MS: i64 = 10_000;

pub fn ticks_to_ms(ticks: i64) -> u64 {
    if ticks <= 0 {
        return 0;
    }
    (ticks / TICKS_PER_MS) as u64
}

pub fn kbps_to_bps(kbps: u64) -> u64 {
    kbps.saturating_mul(1_000)
}

/// Normalizes a vendor resolution label.
///
/// `"1080"` becomes `"1080p"`, `"4k"` in any case becomes `"4K"`, anything
/// else is passed through trimmed.
pub fn normalize_resolution(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.eq_ignore_ascii_case("4k") {
        return Some("4K".to_string());
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("{raw}p"));
    }
    Some(raw.to_string())
}

/// Buckets a pixel height into a resolution label.
pub fn resolution_from_height(height: Option<u32>) -> Option<String> {
    let height = height.filter(|h| *h > 0)?;
    let label = match height {
        h if h >= 2160 => "4K".to_string(),
        h if h >= 1080 => "1080p".to_string(),
        h if h >= 720 => "720p".to_string(),
        h if h >= 480 => "480p".to_string(),
        h => format!("{h}p"),
    };
    Some(label)
}

/// Explicit three-state decision as reported per track.
pub fn parse_decision(raw: Option<&str>) -> StreamDecision {
    match raw.map(|r| r.trim().to_ascii_lowercase()) {
        Some(r) if r == "transcode" => StreamDecision::Transcode,
        Some(r) if r == "copy" => StreamDecision::Copy,
        _ => StreamDecision::DirectPlay,
    }
}

/// Decision for vendors that only expose an "is direct" flag per track.
/// No transcode object at all means the track is played directly.
pub fn decision_from_direct_flag(transcoding: bool, is_direct: Option<bool>) -> StreamDecision {
    match (transcoding, is_direct) {
        (true, Some(false)) => StreamDecision::Transcode,
        _ => StreamDecision::DirectPlay,
    }
}

/// Any reported acceleration value counts unless it is an explicit off sentinel.
pub fn is_hw_accelerated(raw: Option<&str>) -> bool {
    match raw.map(str::trim) {
        None => false,
        Some(v) => !matches!(
            v.to_ascii_lowercase().as_str(),
            "" | "0" | "off" | "none" | "false"
        ),
    }
}

pub fn media_type_from(raw: &str) -> MediaType {
    match raw.trim().to_ascii_lowercase().as_str() {
        "movie" | "video" | "clip" => MediaType::Movie,
        "episode" => MediaType::Episode,
        "track" | "audio" | "musicvideo" => MediaType::Track,
        "tvchannel" | "livetvchannel" | "program" | "livetvprogram" | "live" => MediaType::LiveTv,
        _ => MediaType::Unknown,
    }
}

/// Lenient numeric parsing for attribute-style payloads.
pub fn parse_u64(raw: Option<&str>) -> Option<u64> {
    let raw = raw?.trim();
    raw.parse::<u64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64))
}

pub fn parse_u32(raw: Option<&str>) -> Option<u32> {
    parse_u64(raw).and_then(|v| u32::try_from(v).ok())
}

pub fn parse_f64(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok()
}

pub fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
