//! HTTP surface: the metadata endpoint and the download endpoint.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{State, rejection::JsonRejection},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, build_catalog, format_duration, format_views};
use crate::delivery::deliver;
use crate::envelope::OutputEnvelope;
use crate::error::{ApiError, ApiResult, DownloadError};
use crate::extractor::{ByteStream, Extractor};
use crate::metadata::VideoInfo;
use crate::mux::Muxer;
use crate::selector::{DeliveryPlan, select};

const INFO_FAILED_MESSAGE: &str =
    "Failed to fetch video information. Please check the URL and try again.";
const DOWNLOAD_FAILED_MESSAGE: &str = "Failed to download. Please try again.";

/// Shared handles only; every request builds its own plan and streams.
#[derive(Clone)]
pub struct AppState {
    extractor: Arc<dyn Extractor>,
    muxer: Arc<Muxer>,
}

impl AppState {
    pub fn new(extractor: Arc<dyn Extractor>, muxer: Muxer) -> Self {
        Self {
            extractor,
            muxer: Arc::new(muxer),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/video-info", post(video_info))
        .route("/api/download", post(download))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct VideoInfoRequest {
    #[serde(default, alias = "source")]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DownloadRequest {
    #[serde(default, alias = "source")]
    url: Option<String>,
    /// Accepts both the numeric itags older clients send and string ids.
    #[serde(
        default,
        rename = "itag",
        alias = "formatIdentifier",
        deserialize_with = "deserialize_format_id"
    )]
    format_id: Option<String>,
}

fn deserialize_format_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(id)) => Some(id),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoInfoResponse {
    title: String,
    thumbnail: String,
    duration_text: String,
    views_text: String,
    #[serde(flatten)]
    catalog: Catalog,
}

impl VideoInfoResponse {
    fn from_info(info: &VideoInfo) -> Self {
        Self {
            title: info.title.clone(),
            thumbnail: info
                .best_thumbnail()
                .map(|thumb| thumb.url.clone())
                .unwrap_or_default(),
            duration_text: format_duration(info.length_seconds),
            views_text: format_views(info.view_count),
            catalog: build_catalog(&info.formats),
        }
    }
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn video_info(
    State(state): State<AppState>,
    payload: Result<Json<VideoInfoRequest>, JsonRejection>,
) -> ApiResult<Json<VideoInfoResponse>> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let result = async {
        let source = validated_source(state.extractor.as_ref(), request.url)?;
        let info = state.extractor.info(&source).await?;
        Ok::<_, DownloadError>(VideoInfoResponse::from_info(&info))
    }
    .await;

    result.map(Json).map_err(|err| {
        report(&err, "video info request failed");
        ApiError::from_download(&err, INFO_FAILED_MESSAGE)
    })
}

async fn download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let (envelope, body) = prepare_download(&state, request).await.map_err(|err| {
        report(&err, "download request failed");
        ApiError::from_download(&err, DOWNLOAD_FAILED_MESSAGE)
    })?;

    Ok((envelope.headers(), Body::from_stream(body)).into_response())
}

/// Everything that can fail before the first byte is sent.
async fn prepare_download(
    state: &AppState,
    request: DownloadRequest,
) -> Result<(OutputEnvelope, ByteStream), DownloadError> {
    let source = validated_source(state.extractor.as_ref(), request.url)?;
    let info = state.extractor.info(&source).await?;
    let format_id = request.format_id.unwrap_or_default();
    let plan = select(&format_id, &info.formats)?;
    let envelope = OutputEnvelope::for_plan(&info.title, &plan);

    match &plan {
        DeliveryPlan::Passthrough(format) => info!(
            %source,
            format = %format.id,
            file = %envelope.filename,
            "starting passthrough download"
        ),
        DeliveryPlan::Muxed {
            video,
            audio,
            target,
        } => info!(
            %source,
            video = %video.id,
            audio = %audio.id,
            container = target.extension(),
            file = %envelope.filename,
            "starting muxed download"
        ),
    }

    let body = deliver(state.extractor.as_ref(), &state.muxer, &source, &plan).await?;
    Ok((envelope, body))
}

fn validated_source(
    extractor: &dyn Extractor,
    source: Option<String>,
) -> Result<String, DownloadError> {
    source
        .map(|source| source.trim().to_owned())
        .filter(|source| !source.is_empty() && extractor.validate(source))
        .ok_or(DownloadError::InvalidSource)
}

fn report(err: &DownloadError, message: &str) {
    if err.status().is_server_error() {
        error!(%err, "{message}");
    } else {
        warn!(%err, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ExtractError;
    use crate::metadata::{FormatDescriptor, Thumbnail};
    use async_trait::async_trait;
    use axum::{
        body::{Bytes, to_bytes},
        http::{Request, StatusCode, header},
    };
    use futures_util::stream;
    use std::{collections::HashMap, fs, io, os::unix::fs::PermissionsExt, path::Path};
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    const SOURCE: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
    const BROKEN_FORMAT: &str = "broken";

    /// In-memory oracle: formats and the bytes each one streams.
    struct FakeExtractor {
        info: Option<VideoInfo>,
        payloads: HashMap<String, Vec<&'static str>>,
    }

    #[async_trait]
    impl Extractor for FakeExtractor {
        async fn info(&self, _source: &str) -> Result<VideoInfo, ExtractError> {
            self.info.clone().ok_or_else(|| ExtractError::Failed {
                status: "exit status: 1".into(),
                stderr: "Video unavailable".into(),
            })
        }

        async fn open_stream(
            &self,
            _source: &str,
            format_id: &str,
        ) -> Result<ByteStream, ExtractError> {
            let mut items: Vec<io::Result<Bytes>> = self
                .payloads
                .get(format_id)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
                .collect();
            if format_id == BROKEN_FORMAT {
                items.push(Err(io::Error::other("connection reset")));
            }
            Ok(Box::pin(stream::iter(items)))
        }
    }

    fn format(
        id: &str,
        has_video: bool,
        has_audio: bool,
        container: &str,
        mime: &str,
    ) -> FormatDescriptor {
        FormatDescriptor {
            id: id.into(),
            has_video,
            has_audio,
            quality_label: None,
            container: Some(container.into()),
            mime_type: Some(mime.into()),
            video_codec: None,
            audio_codec: None,
            audio_bitrate: None,
        }
    }

    fn sample_info(formats: Vec<FormatDescriptor>) -> VideoInfo {
        VideoInfo {
            title: "Foo Bar: Live! (2024)".into(),
            thumbnails: vec![
                Thumbnail {
                    url: "https://img/default.jpg".into(),
                    width: Some(120),
                    height: Some(90),
                },
                Thumbnail {
                    url: "https://img/maxres.jpg".into(),
                    width: Some(1280),
                    height: Some(720),
                },
            ],
            length_seconds: 212,
            view_count: 1_234_567,
            formats,
        }
    }

    fn install_ffmpeg_stub(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("ffmpeg");
        let script = r#"#!/usr/bin/env bash
set -euo pipefail
inputs=()
prev=""
for arg in "$@"; do
    if [[ "$prev" == "-i" ]]; then
        inputs+=("$arg")
    fi
    prev="$arg"
done
cat "${inputs[0]}"
cat "${inputs[1]}"
"#;
        fs::write(&path, script).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn app(
        info: Option<VideoInfo>,
        payloads: Vec<(&str, Vec<&'static str>)>,
    ) -> (TempDir, Router) {
        let dir = tempdir().unwrap();
        let extractor = FakeExtractor {
            info,
            payloads: payloads
                .into_iter()
                .map(|(id, chunks)| (id.to_string(), chunks))
                .collect(),
        };
        let muxer = Muxer::new(install_ffmpeg_stub(dir.path()));
        (dir, router(AppState::new(Arc::new(extractor), muxer)))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (_dir, app) = app(None, Vec::new());
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn video_info_shapes_metadata_for_the_ui() {
        let mut video = format("137", true, false, "mp4", "video/mp4");
        video.quality_label = Some("1080p".into());
        let mut combined = format("18", true, true, "mp4", "video/mp4");
        combined.quality_label = Some("360p".into());
        let mut audio = format("140", false, true, "m4a", "audio/mp4");
        audio.audio_bitrate = Some(128);

        let (_dir, app) = app(Some(sample_info(vec![combined, video, audio])), Vec::new());
        let response = app
            .oneshot(post_json("/api/video-info", serde_json::json!({ "url": SOURCE })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({
                "title": "Foo Bar: Live! (2024)",
                "thumbnail": "https://img/maxres.jpg",
                "durationText": "3:32",
                "viewsText": "1.2M",
                "videoFormats": [
                    {"id": "137", "quality": "1080p", "type": "mp4", "hasAudio": false, "container": "mp4"},
                    {"id": "18", "quality": "360p", "type": "mp4", "hasAudio": true, "container": "mp4"}
                ],
                "audioFormats": [
                    {"id": "140", "quality": "128kbps", "type": "m4a", "container": "m4a"}
                ]
            })
        );
    }

    #[tokio::test]
    async fn video_info_rejects_invalid_url() {
        let (_dir, app) = app(Some(sample_info(Vec::new())), Vec::new());
        let response = app
            .oneshot(post_json(
                "/api/video-info",
                serde_json::json!({ "url": "https://example.com/video" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"error": "Invalid YouTube URL"})
        );
    }

    #[tokio::test]
    async fn video_info_hides_extractor_failures() {
        let (_dir, app) = app(None, Vec::new());
        let response = app
            .oneshot(post_json("/api/video-info", serde_json::json!({ "source": SOURCE })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"error": INFO_FAILED_MESSAGE})
        );
    }

    #[tokio::test]
    async fn download_passes_combined_format_through() {
        let formats = vec![format("18", true, true, "mp4", "video/mp4; codecs=\"avc1\"")];
        let (_dir, app) = app(Some(sample_info(formats)), vec![("18", vec!["abc", "def"])]);
        let response = app
            .oneshot(post_json(
                "/api/download",
                serde_json::json!({ "url": SOURCE, "itag": 18 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "video/mp4; codecs=\"avc1\""
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"Foo_Bar__Live___2024_.mp4\""
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"abcdef");
    }

    #[tokio::test]
    async fn download_muxes_video_only_with_best_audio() {
        let mut video = format("248", true, false, "webm", "video/webm");
        video.video_codec = Some("vp09.00.40.08".into());
        let mut low = format("140", false, true, "m4a", "audio/mp4");
        low.audio_bitrate = Some(128);
        let mut high = format("251", false, true, "webm", "audio/webm");
        high.audio_bitrate = Some(160);

        let (_dir, app) = app(
            Some(sample_info(vec![video, low, high])),
            vec![
                ("248", vec!["VIDEO"]),
                ("140", vec!["LOW"]),
                ("251", vec!["HIGH"]),
            ],
        );
        let response = app
            .oneshot(post_json(
                "/api/download",
                serde_json::json!({ "source": SOURCE, "formatIdentifier": "248" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/webm");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"Foo_Bar__Live___2024_.webm\""
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"VIDEOHIGH");
    }

    #[tokio::test]
    async fn download_unknown_format_is_not_found() {
        let formats = vec![format("18", true, true, "mp4", "video/mp4")];
        let (_dir, app) = app(Some(sample_info(formats)), vec![("18", vec!["abc"])]);
        let response = app
            .oneshot(post_json(
                "/api/download",
                serde_json::json!({ "url": SOURCE, "itag": "22" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"error": "Format not found"})
        );
    }

    #[tokio::test]
    async fn download_video_only_without_audio_is_not_found() {
        let formats = vec![format("137", true, false, "mp4", "video/mp4")];
        let (_dir, app) = app(Some(sample_info(formats)), Vec::new());
        let response = app
            .oneshot(post_json(
                "/api/download",
                serde_json::json!({ "url": SOURCE, "itag": 137 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"error": "No audio stream available to pair with this format"})
        );
    }

    #[tokio::test]
    async fn download_rejects_missing_url() {
        let (_dir, app) = app(Some(sample_info(Vec::new())), Vec::new());
        let response = app
            .oneshot(post_json("/api/download", serde_json::json!({ "itag": 18 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn download_reports_extractor_failure_as_server_error() {
        let (_dir, app) = app(None, Vec::new());
        let response = app
            .oneshot(post_json(
                "/api/download",
                serde_json::json!({ "url": SOURCE, "itag": 18 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"error": DOWNLOAD_FAILED_MESSAGE})
        );
    }

    #[tokio::test]
    async fn upstream_failure_mid_transfer_aborts_body() {
        let formats = vec![format(BROKEN_FORMAT, false, true, "webm", "audio/webm")];
        let (_dir, app) = app(Some(sample_info(formats)), vec![(BROKEN_FORMAT, vec!["partial"])]);
        let response = app
            .oneshot(post_json(
                "/api/download",
                serde_json::json!({ "url": SOURCE, "itag": BROKEN_FORMAT }),
            ))
            .await
            .unwrap();

        // Headers are already committed; the failure can only show up in the body.
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/webm");
        assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
    }
}
