//! [`Extractor`] backed by the `yt-dlp` executable.
//!
//! Metadata comes from `--dump-single-json`; streams come from `-f <id> -o -`
//! so bytes flow straight from yt-dlp's stdout into the response without ever
//! touching the disk.

use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use mime_guess::MimeGuess;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::delivery::log_process_stderr;
use crate::extractor::{ByteStream, ExtractError, Extractor};
use crate::metadata::{FormatDescriptor, Thumbnail, VideoInfo};

/// Subset of the `yt-dlp --dump-single-json` payload we care about. Every field
/// is optional because extractors differ in what they report.
#[derive(Debug, Deserialize)]
struct RawInfo {
    title: Option<String>,
    fulltitle: Option<String>,
    thumbnail: Option<String>,
    thumbnails: Option<Vec<RawThumbnail>>,
    duration: Option<f64>,
    view_count: Option<u64>,
    formats: Option<Vec<RawFormat>>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    format_note: Option<String>,
    height: Option<u32>,
    resolution: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    abr: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    cookies: Option<PathBuf>,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cookies: None,
        }
    }

    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--no-warnings")
            .arg("--no-progress")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(cookies) = self.cookies.as_ref().filter(|path| path.exists()) {
            command.arg("--cookies").arg(cookies);
        }

        command
    }

    fn spawn_error(&self, source: io::Error) -> ExtractError {
        ExtractError::Spawn {
            program: self.program.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl Extractor for YtDlp {
    async fn info(&self, source: &str) -> Result<VideoInfo, ExtractError> {
        let mut command = self.command();
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--")
            .arg(source);

        debug!(source, "fetching metadata");
        let output = command
            .output()
            .await
            .map_err(|err| self.spawn_error(err))?;

        if !output.status.success() {
            return Err(ExtractError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let raw: RawInfo = serde_json::from_slice(&output.stdout)?;
        Ok(raw.into_video_info())
    }

    async fn open_stream(
        &self,
        source: &str,
        format_id: &str,
    ) -> Result<ByteStream, ExtractError> {
        let mut command = self.command();
        command
            .arg("--quiet")
            .arg("-f")
            .arg(format_id)
            .arg("-o")
            .arg("-")
            .arg("--")
            .arg(source)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(source, format_id, "opening upstream stream");
        let mut child = command.spawn().map_err(|err| self.spawn_error(err))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("yt-dlp stdout was not captured"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_process_stderr(stderr, "yt-dlp"));
        }

        let format_id = format_id.to_owned();
        // `child` moves into the stream so dropping the body kills yt-dlp.
        let stream = stream! {
            let mut chunks = ReaderStream::new(stdout);
            while let Some(chunk) = chunks.next().await {
                let failed = chunk.is_err();
                yield chunk;
                if failed {
                    return;
                }
            }
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    warn!(%format_id, %status, "yt-dlp stream ended with failure");
                    yield Err(io::Error::other(format!(
                        "yt-dlp exited with {status} while streaming format {format_id}"
                    )));
                }
                Err(err) => yield Err(err),
            }
        };

        Ok(Box::pin(stream))
    }
}

impl RawInfo {
    fn into_video_info(self) -> VideoInfo {
        let title = self
            .fulltitle
            .filter(|t| !t.is_empty())
            .or(self.title)
            .unwrap_or_default();

        let mut thumbnails: Vec<Thumbnail> = self
            .thumbnails
            .unwrap_or_default()
            .into_iter()
            .filter_map(|thumb| {
                thumb.url.map(|url| Thumbnail {
                    url,
                    width: thumb.width,
                    height: thumb.height,
                })
            })
            .collect();
        if thumbnails.is_empty()
            && let Some(url) = self.thumbnail
        {
            thumbnails.push(Thumbnail {
                url,
                width: None,
                height: None,
            });
        }

        let formats = self
            .formats
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawFormat::into_descriptor)
            .collect();

        VideoInfo {
            title,
            thumbnails,
            length_seconds: self.duration.map(|d| d.max(0.0).round() as u64).unwrap_or(0),
            view_count: self.view_count.unwrap_or(0),
            formats,
        }
    }
}

impl RawFormat {
    fn into_descriptor(self) -> Option<FormatDescriptor> {
        let id = self.format_id?.trim().to_owned();
        if id.is_empty() {
            return None;
        }

        let has_video = codec_present(self.vcodec.as_deref());
        let has_audio = codec_present(self.acodec.as_deref());

        let quality_label = self
            .format_note
            .filter(|note| !note.is_empty())
            .or_else(|| self.height.map(|h| format!("{h}p")))
            .or(self.resolution);

        let mime_type = self
            .ext
            .as_deref()
            .map(|ext| mime_for_container(ext, has_audio && !has_video));

        Some(FormatDescriptor {
            id,
            has_video,
            has_audio,
            quality_label,
            container: self.ext,
            mime_type,
            video_codec: self.vcodec.filter(|_| has_video),
            audio_codec: self.acodec.filter(|_| has_audio),
            audio_bitrate: self.abr.filter(|abr| *abr > 0.0).map(|abr| abr.round() as u32),
        })
    }
}

/// yt-dlp reports missing tracks as the literal codec `none`.
fn codec_present(codec: Option<&str>) -> bool {
    codec.is_some_and(|codec| !codec.is_empty() && !codec.eq_ignore_ascii_case("none"))
}

/// Maps a container extension to the MIME type sent to clients. Audio-only
/// streams in a video container get the `audio/` flavour.
pub fn mime_for_container(ext: &str, audio_only: bool) -> String {
    match (ext, audio_only) {
        ("m4a", _) | ("mp4", true) => "audio/mp4".to_owned(),
        ("webm", true) => "audio/webm".to_owned(),
        ("webm", false) => "video/webm".to_owned(),
        ("mp4", false) => "video/mp4".to_owned(),
        ("mp3", _) => "audio/mpeg".to_owned(),
        ("mkv", _) => "video/x-matroska".to_owned(),
        (other, _) => MimeGuess::from_ext(other)
            .first()
            .map(|mime| mime.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_owned()),
    }
}
