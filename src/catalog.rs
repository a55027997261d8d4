//! Turns the raw format list of a source into the two option lists shown to
//! the user, plus the small text helpers used by the metadata endpoint.

use std::collections::HashSet;

use serde::Serialize;

use crate::metadata::FormatDescriptor;

/// Video-capable option. `has_audio` tells the UI whether the download will
/// be a straight passthrough or a muxed pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOption {
    pub id: String,
    pub quality: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub has_audio: bool,
    pub container: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOption {
    pub id: String,
    pub quality: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub container: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub video_formats: Vec<VideoOption>,
    pub audio_formats: Vec<AudioOption>,
}

/// Label used for audio formats whose bitrate is unknown or zero.
const UNKNOWN_AUDIO_LABEL: &str = "Audio";
const UNKNOWN_VIDEO_LABEL: &str = "unknown";

pub fn build_catalog(formats: &[FormatDescriptor]) -> Catalog {
    Catalog {
        video_formats: video_options(formats),
        audio_formats: audio_options(formats),
    }
}

/// First occurrence of each quality label wins; the sort is stable so equal
/// ranks keep source order.
fn video_options(formats: &[FormatDescriptor]) -> Vec<VideoOption> {
    let mut seen = HashSet::new();
    let mut options: Vec<(u8, VideoOption)> = formats
        .iter()
        .filter(|format| format.has_video)
        .filter_map(|format| {
            let quality = format
                .quality_label
                .clone()
                .unwrap_or_else(|| UNKNOWN_VIDEO_LABEL.to_owned());
            if !seen.insert(quality.clone()) {
                return None;
            }
            let container = format.container.clone().unwrap_or_default();
            Some((
                format.quality_rank(),
                VideoOption {
                    id: format.id.clone(),
                    quality,
                    kind: container.clone(),
                    has_audio: format.has_audio,
                    container,
                },
            ))
        })
        .collect();

    options.sort_by(|(a, _), (b, _)| b.cmp(a));
    options.into_iter().map(|(_, option)| option).collect()
}

fn audio_options(formats: &[FormatDescriptor]) -> Vec<AudioOption> {
    let mut seen = HashSet::new();
    let mut options: Vec<AudioOption> = formats
        .iter()
        .filter(|format| format.is_audio_only())
        .filter_map(|format| {
            let quality = format
                .audio_bitrate
                .filter(|kbps| *kbps > 0)
                .map(|kbps| format!("{kbps}kbps"))
                .unwrap_or_else(|| UNKNOWN_AUDIO_LABEL.to_owned());
            let container = format.container.clone().unwrap_or_default();
            if !seen.insert((quality.clone(), container.clone())) {
                return None;
            }
            Some(AudioOption {
                id: format.id.clone(),
                quality,
                kind: container.clone(),
                container,
            })
        })
        .collect();

    options.sort_by(|a, b| label_bitrate(&b.quality).cmp(&label_bitrate(&a.quality)));
    options
}

/// Parses the leading number of a `128kbps` label. Anything unparsable counts
/// as zero so it sorts after every real bitrate.
fn label_bitrate(label: &str) -> u32 {
    let digits: String = label.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Renders durations as `H:MM:SS` or `M:SS` for short clips.
pub fn format_duration(duration: u64) -> String {
    let hours = duration / 3600;
    let minutes = (duration % 3600) / 60;
    let seconds = duration % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Compact view counter: `1.2M`, `3.4K` or the plain number.
pub fn format_views(views: u64) -> String {
    if views >= 1_000_000 {
        format!("{:.1}M", views as f64 / 1_000_000.0)
    } else if views >= 1_000 {
        format!("{:.1}K", views as f64 / 1_000.0)
    } else {
        views.to_string()
    }
}
