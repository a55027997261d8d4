//! Executes a [`DeliveryPlan`]: opens the upstream stream(s) and returns the
//! byte stream that becomes the response body.

use futures_util::TryStreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, warn};

use crate::error::DownloadError;
use crate::extractor::{ByteStream, Extractor};
use crate::mux::Muxer;
use crate::selector::DeliveryPlan;

/// Opens whatever the plan needs. Errors returned here happen before any byte
/// is sent; failures after that point show up as an `Err` item in the stream,
/// which makes hyper abort the connection instead of ending the body cleanly.
pub async fn deliver(
    extractor: &dyn Extractor,
    muxer: &Muxer,
    source: &str,
    plan: &DeliveryPlan,
) -> Result<ByteStream, DownloadError> {
    match plan {
        DeliveryPlan::Passthrough(format) => {
            let upstream = extractor.open_stream(source, &format.id).await?;
            Ok(log_transfer_errors(upstream, format.id.clone()))
        }
        DeliveryPlan::Muxed {
            video,
            audio,
            target,
        } => {
            debug!(video = %video.id, audio = %audio.id, ?target, "muxing separate streams");
            let (video_stream, audio_stream) = tokio::try_join!(
                extractor.open_stream(source, &video.id),
                extractor.open_stream(source, &audio.id),
            )?;
            muxer
                .spawn(video_stream, audio_stream, *target)
                .map_err(|err| DownloadError::Transfer(err.to_string()))
        }
    }
}

fn log_transfer_errors(upstream: ByteStream, format_id: String) -> ByteStream {
    Box::pin(upstream.inspect_err(move |err| {
        error!(%format_id, %err, "upstream failed mid-transfer, aborting response");
    }))
}

/// Drains a child's stderr into the log, one line per event.
pub(crate) async fn log_process_stderr<R>(stderr: R, program: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if !line.is_empty() {
                    warn!(program, "{line}");
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(program, %err, "stopped reading stderr");
                break;
            }
        }
    }
}
