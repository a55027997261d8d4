//! Decides how a chosen format gets delivered.
//!
//! Formats carrying both tracks, and audio-only formats, are streamed through
//! untouched. A video-only format is paired with the best audio-only format of
//! the same source and remuxed; the codec family of the video track decides
//! the target container and therefore which audio encoder ffmpeg has to use.

use thiserror::Error;

use crate::metadata::FormatDescriptor;

/// Substrings (lowercase) identifying codecs that only fit in WebM.
const WEBM_VIDEO_CODECS: [&str; 4] = ["vp9", "vp09", "av01", "av1"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("Format not found")]
    FormatNotFound,
    #[error("No audio stream available to pair with this format")]
    NoAudioCompanion,
}

/// Container produced by the muxer, with the audio encoder it implies. The
/// video track is always copied as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxTarget {
    /// VP9/AV1 video, Opus audio.
    Webm,
    /// Everything else (H.264 in practice), AAC audio, fragmented so the
    /// output can be streamed before the muxer knows the final size.
    Mp4,
}

impl MuxTarget {
    pub fn for_video_codec(codec: Option<&str>) -> Self {
        let codec = codec.unwrap_or_default().to_ascii_lowercase();
        if WEBM_VIDEO_CODECS.iter().any(|family| codec.contains(family)) {
            Self::Webm
        } else {
            Self::Mp4
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Webm => "webm",
            Self::Mp4 => "mp4",
        }
    }

    /// Value for ffmpeg's `-f`.
    pub fn muxer(self) -> &'static str {
        self.extension()
    }

    pub fn audio_encoder(self) -> &'static str {
        match self {
            Self::Webm => "libopus",
            Self::Mp4 => "aac",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Webm => "video/webm",
            Self::Mp4 => "video/mp4",
        }
    }

    pub fn is_fragmented(self) -> bool {
        matches!(self, Self::Mp4)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryPlan {
    Passthrough(FormatDescriptor),
    Muxed {
        video: FormatDescriptor,
        audio: FormatDescriptor,
        target: MuxTarget,
    },
}

pub fn select(format_id: &str, formats: &[FormatDescriptor]) -> Result<DeliveryPlan, SelectError> {
    let chosen = formats
        .iter()
        .find(|format| format.id == format_id)
        .ok_or(SelectError::FormatNotFound)?;

    match (chosen.has_video, chosen.has_audio) {
        (true, true) | (false, true) => Ok(DeliveryPlan::Passthrough(chosen.clone())),
        (true, false) => {
            let audio = best_audio_companion(formats).ok_or(SelectError::NoAudioCompanion)?;
            Ok(DeliveryPlan::Muxed {
                video: chosen.clone(),
                audio: audio.clone(),
                target: MuxTarget::for_video_codec(chosen.video_codec.as_deref()),
            })
        }
        (false, false) => Err(SelectError::FormatNotFound),
    }
}

/// Highest bitrate audio-only format. Only a strictly higher bitrate replaces
/// the current pick, so ties go to the earliest entry. A missing bitrate
/// counts as zero.
pub fn best_audio_companion(formats: &[FormatDescriptor]) -> Option<&FormatDescriptor> {
    let mut best: Option<&FormatDescriptor> = None;
    for candidate in formats.iter().filter(|format| format.is_audio_only()) {
        let replace = match best {
            None => true,
            Some(current) => {
                candidate.audio_bitrate.unwrap_or(0) > current.audio_bitrate.unwrap_or(0)
            }
        };
        if replace {
            best = Some(candidate);
        }
    }
    best
}
