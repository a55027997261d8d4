//! Format and video metadata as returned by the extraction oracle.
//!
//! Every value in this module is request-scoped: it is produced by an
//! [`Extractor`](crate::extractor::Extractor) for one URL, consumed by the
//! catalog builder or the stream selector, and then dropped. Nothing here is
//! persisted or shared between requests.

use serde::{Deserialize, Serialize};

/// Ranking table used to order video qualities for display. Labels that are
/// not listed (e.g. `1080p60`, `4320p`) rank as the lowest entry.
const QUALITY_RANKS: [(&str, u8); 8] = [
    ("144p", 0),
    ("240p", 1),
    ("360p", 2),
    ("480p", 3),
    ("720p", 4),
    ("1080p", 5),
    ("1440p", 6),
    ("2160p", 7),
];

/// Description of a single encoded stream variant of a source.
///
/// `id` is opaque and only meaningful to the extractor that produced it. The
/// capability flags decide how the stream is delivered: a descriptor carrying
/// both tracks is passed through as-is, a video-only one has to be paired with
/// an audio companion and muxed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub id: String,
    pub has_video: bool,
    pub has_audio: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_label: Option<String>,
    /// File extension hint, e.g. `mp4`, `webm`, `m4a`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    /// Audio bitrate in kbps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<u32>,
}

impl FormatDescriptor {
    /// Video-only streams must be muxed with a companion before delivery.
    pub fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    /// Sort key for the video catalog. Unknown labels rank 0.
    pub fn quality_rank(&self) -> u8 {
        self.quality_label
            .as_deref()
            .map(quality_rank)
            .unwrap_or(0)
    }
}

pub fn quality_rank(label: &str) -> u8 {
    QUALITY_RANKS
        .iter()
        .find(|(known, _)| *known == label)
        .map(|(_, rank)| *rank)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Everything the oracle knows about one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub title: String,
    /// Ordered from lowest to highest preference, as the oracle reports them.
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
    pub length_seconds: u64,
    pub view_count: u64,
    #[serde(default)]
    pub formats: Vec<FormatDescriptor>,
}

impl VideoInfo {
    pub fn best_thumbnail(&self) -> Option<&Thumbnail> {
        self.thumbnails.last()
    }

    pub fn find_format(&self, id: &str) -> Option<&FormatDescriptor> {
        self.formats.iter().find(|format| format.id == id)
    }
}
