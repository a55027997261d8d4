//! Error taxonomy of the download flow and its mapping onto HTTP responses.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::extractor::ExtractError;
use crate::selector::SelectError;

/// Pre-flight failures map to a status code and a JSON body. `Transfer` is
/// only ever returned before headers go out (the muxer failing to start);
/// later transfer failures travel inside the body stream.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Invalid YouTube URL")]
    InvalidSource,
    #[error("Format not found")]
    FormatNotFound,
    #[error("No audio stream available to pair with this format")]
    NoAudioCompanion,
    #[error("extraction failed: {0}")]
    UpstreamExtraction(#[from] ExtractError),
    #[error("transfer failed: {0}")]
    Transfer(String),
}

impl DownloadError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidSource => StatusCode::BAD_REQUEST,
            Self::FormatNotFound | Self::NoAudioCompanion => StatusCode::NOT_FOUND,
            Self::UpstreamExtraction(_) | Self::Transfer(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SelectError> for DownloadError {
    fn from(err: SelectError) -> Self {
        match err {
            SelectError::FormatNotFound => Self::FormatNotFound,
            SelectError::NoAudioCompanion => Self::NoAudioCompanion,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    /// Client errors expose their own message; server errors are replaced by
    /// `public_message` so internal details stay in the logs.
    pub fn from_download(err: &DownloadError, public_message: &str) -> Self {
        let status = err.status();
        let message = if status.is_server_error() {
            public_message.to_owned()
        } else {
            err.to_string()
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (
            self.status,
            [(header::CONTENT_TYPE, "application/json")],
            Json(body),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
