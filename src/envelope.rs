//! Download response headers derived from a [`DeliveryPlan`].

use axum::http::{HeaderMap, HeaderValue, header};

use crate::selector::DeliveryPlan;

const VIDEO_FALLBACK_EXTENSION: &str = "mp4";
const AUDIO_FALLBACK_EXTENSION: &str = "mp3";
const VIDEO_FALLBACK_CONTENT_TYPE: &str = "video/mp4";
const AUDIO_FALLBACK_CONTENT_TYPE: &str = "audio/mpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEnvelope {
    pub content_type: String,
    pub filename: String,
}

impl OutputEnvelope {
    pub fn for_plan(title: &str, plan: &DeliveryPlan) -> Self {
        let (extension, content_type) = match plan {
            DeliveryPlan::Passthrough(format) => {
                let (ext_fallback, type_fallback) = if format.has_video {
                    (VIDEO_FALLBACK_EXTENSION, VIDEO_FALLBACK_CONTENT_TYPE)
                } else {
                    (AUDIO_FALLBACK_EXTENSION, AUDIO_FALLBACK_CONTENT_TYPE)
                };
                (
                    format
                        .container
                        .clone()
                        .filter(|ext| !ext.is_empty())
                        .unwrap_or_else(|| ext_fallback.to_owned()),
                    format
                        .mime_type
                        .clone()
                        .filter(|mime| !mime.is_empty())
                        .unwrap_or_else(|| type_fallback.to_owned()),
                )
            }
            DeliveryPlan::Muxed { target, .. } => (
                target.extension().to_owned(),
                target.content_type().to_owned(),
            ),
        };

        Self {
            content_type,
            filename: format!("{}.{}", sanitize_title(title), sanitize_extension(&extension)),
        }
    }

    pub fn disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.filename)
    }

    /// `Content-Type` and `Content-Disposition` for the response. A mime type
    /// that is not a valid header value degrades to `application/octet-stream`.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let content_type = HeaderValue::from_str(&self.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
        headers.insert(header::CONTENT_TYPE, content_type);
        // The filename is ASCII alphanumerics and underscores only.
        if let Ok(disposition) = HeaderValue::from_str(&self.disposition()) {
            headers.insert(header::CONTENT_DISPOSITION, disposition);
        }
        headers
    }
}

/// Replaces every character outside `[A-Za-z0-9]` with `_`.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn sanitize_extension(extension: &str) -> String {
    extension
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}
