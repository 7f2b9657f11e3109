//! # Source Catalog
//!
//! The server describes a stream as a JSON document listing every delivery
//! option it offers. [`SourceCatalog`] turns that list into the immutable,
//! sorted candidate set the combo selector searches.
//!
//! ## Ordering
//!
//! Sources are sorted exactly once, on construction, by:
//!
//! 1. `simul_tracks` descending (more tracks played together first)
//! 2. `priority` descending
//! 3. `mime_type` ascending
//! 4. `url` descending
//!
//! Each source is then stamped with its position in that order, which is the
//! `source_index` combos and resume cursors refer to.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Whether the stream is a live broadcast or on-demand content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    #[default]
    Live,
    Vod,
}

/// One source entry as the server advertises it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub url: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub simul_tracks: u32,
    #[serde(default)]
    pub total_matches: u32,
    /// URL relative to the stream's base, when the server provides one.
    #[serde(default)]
    pub relurl: Option<String>,
}

/// Track metadata keyed by the server's track name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub codec: String,
    #[serde(default)]
    pub idx: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMeta {
    #[serde(default)]
    pub tracks: BTreeMap<String, TrackInfo>,
}

/// Server stream description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    #[serde(rename = "type", default)]
    pub kind: StreamKind,
    #[serde(default)]
    pub source: Vec<SourceEntry>,
    #[serde(default)]
    pub meta: StreamMeta,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl StreamInfo {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// A delivery option after sorting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub mime_type: String,
    pub priority: i32,
    pub simul_tracks: u32,
    /// Position in the sorted catalog.
    pub index: usize,
    pub total_matches: u32,
    pub relurl: Option<String>,
}

impl Source {
    pub fn new(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: mime_type.into(),
            priority: 0,
            simul_tracks: 0,
            index: 0,
            total_matches: 0,
            relurl: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_simul_tracks(mut self, simul_tracks: u32) -> Self {
        self.simul_tracks = simul_tracks;
        self
    }
}

impl From<SourceEntry> for Source {
    fn from(entry: SourceEntry) -> Self {
        Self {
            url: entry.url,
            mime_type: entry.mime_type,
            priority: entry.priority,
            simul_tracks: entry.simul_tracks,
            index: 0,
            total_matches: entry.total_matches,
            relurl: entry.relurl,
        }
    }
}

fn catalog_order(a: &Source, b: &Source) -> Ordering {
    b.simul_tracks
        .cmp(&a.simul_tracks)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.mime_type.cmp(&b.mime_type))
        .then_with(|| b.url.cmp(&a.url))
}

/// Immutable, sorted list of delivery options for one stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceCatalog {
    sources: Vec<Source>,
    kind: StreamKind,
    tracks: BTreeMap<String, TrackInfo>,
}

impl SourceCatalog {
    /// Sort `sources` and stamp their indices.
    pub fn new(mut sources: Vec<Source>, kind: StreamKind) -> Self {
        sources.sort_by(catalog_order);
        for (index, source) in sources.iter_mut().enumerate() {
            source.index = index;
        }

        Self {
            sources,
            kind,
            tracks: BTreeMap::new(),
        }
    }

    pub fn from_stream_info(info: StreamInfo) -> Self {
        let sources = info.source.into_iter().map(Source::from).collect();
        let mut catalog = Self::new(sources, info.kind);
        catalog.tracks = info.meta.tracks;
        catalog
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn get(&self, index: usize) -> Option<&Source> {
        self.sources.get(index)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn is_live(&self) -> bool {
        self.kind == StreamKind::Live
    }

    pub fn tracks(&self) -> &BTreeMap<String, TrackInfo> {
        &self.tracks
    }

    /// Codecs of all advertised tracks, in track-name order.
    pub fn codecs(&self) -> Vec<String> {
        self.tracks.values().map(|track| track.codec.clone()).collect()
    }
}
