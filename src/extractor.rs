//! Seam between the HTTP layer and whatever actually talks to the video site.
//!
//! The production implementation lives in [`crate::ytdlp`]; tests plug in an
//! in-memory fake.

use std::{io, pin::Pin};

use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::Stream;
use thiserror::Error;
use url::Url;

use crate::metadata::VideoInfo;

/// Upstream bytes for one format, yielded in the order the source produced
/// them. An `Err` item means the transfer failed and must not be treated as a
/// normal end of stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unable to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("extractor exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("unexpected extractor output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("extractor i/o error: {0}")]
    Io(#[from] io::Error),
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Cheap syntactic check run before anything is fetched.
    fn validate(&self, source: &str) -> bool {
        is_youtube_url(source)
    }

    async fn info(&self, source: &str) -> Result<VideoInfo, ExtractError>;

    async fn open_stream(&self, source: &str, format_id: &str)
    -> Result<ByteStream, ExtractError>;
}

const QUERY_HOSTS: [&str; 5] = [
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
];

const PATH_PREFIXES: [&str; 4] = ["embed", "v", "shorts", "live"];

/// Accepts watch URLs on the known YouTube hosts, `youtu.be` short links and
/// `/embed/`, `/v/`, `/shorts/`, `/live/` paths, as long as they carry a
/// well-formed 11 character video id.
pub fn is_youtube_url(source: &str) -> bool {
    extract_video_id(source).is_some()
}

pub fn extract_video_id(source: &str) -> Option<String> {
    let url = Url::parse(source.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    let segments = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect::<Vec<_>>())
        .unwrap_or_default();

    let candidate = if host == "youtu.be" {
        segments.first().map(|id| (*id).to_owned())
    } else if host == "youtube.com" || host == "www.youtube.com" {
        match segments.as_slice() {
            [prefix, id, ..] if PATH_PREFIXES.contains(prefix) => Some((*id).to_owned()),
            _ => query_id(&url),
        }
    } else if QUERY_HOSTS.contains(&host.as_str()) {
        query_id(&url)
    } else {
        None
    };

    candidate.filter(|id| is_video_id(id))
}

fn query_id(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == "v")
        .map(|(_, value)| value.trim().to_owned())
}

fn is_video_id(id: &str) -> bool {
    id.len() == 11
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
