//! Source metadata recovery for transcoding sessions.
//!
//! Owned by exactly one adapter. Entries only live while a session of that
//! adapter still references the item; [`MetadataRecoveryCache::prune`] runs
//! after every poll.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::models::{ActiveStream, SourceMediaInfo};

#[derive(Debug, Default)]
pub struct MetadataRecoveryCache {
    entries: DashMap<String, SourceMediaInfo>,
}

impl MetadataRecoveryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, item_id: &str) -> Option<SourceMediaInfo> {
        self.entries.get(item_id).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, item_id: &str, info: SourceMediaInfo) {
        self.entries.insert(item_id.to_string(), info);
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.entries.contains_key(item_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry whose item was not referenced by the latest poll.
    /// Returns how many entries were removed.
    pub fn prune(&self, referenced: &HashSet<String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|item_id, _| referenced.contains(item_id));
        before - self.entries.len()
    }
}

/// Overrides the source fields of `stream` with the recovered values. Fields
/// the recovered info does not know keep the reported value.
pub fn apply_source(stream: &mut ActiveStream, source: &SourceMediaInfo) {
    if let Some(codec) = &source.video_codec {
        stream.video_codec = Some(codec.clone());
    }
    if let Some(codec) = &source.audio_codec {
        stream.audio_codec = Some(codec.clone());
    }
    if let Some(resolution) = &source.video_resolution {
        stream.video_resolution = Some(resolution.clone());
    }
    if let Some(bitrate) = source.bitrate {
        stream.bitrate = Some(bitrate);
    }
    if let Some(container) = &source.container {
        stream.container = Some(container.clone());
    }
    if let Some(channels) = source.audio_channels {
        stream.audio_channels = Some(channels);
    }
}
