//! Live remuxing of a video-only and an audio-only stream through ffmpeg.
//!
//! Each request gets a private temporary directory holding two named FIFOs.
//! ffmpeg reads its inputs from them while a pump per track copies upstream
//! bytes in, and its stdout is forwarded to the client through a bounded
//! channel. Every stage awaits the next one, so a slow client ends up pausing
//! the upstream reads instead of growing a buffer.

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_stream::stream;
use axum::body::Bytes;
use futures_util::StreamExt;
use nix::{errno::Errno, sys::stat::Mode, unistd::mkfifo};
use tempfile::TempDir;
use thiserror::Error;
use tokio::{
    io::AsyncWriteExt,
    net::unix::pipe,
    process::{Child, ChildStdout, Command},
    sync::mpsc,
    task::JoinHandle,
    time::sleep,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::delivery::log_process_stderr;
use crate::extractor::ByteStream;
use crate::selector::MuxTarget;

/// Chunks buffered between ffmpeg's stdout and the response body.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 8;
/// Delay between attempts to open a FIFO nobody reads from yet.
const FIFO_OPEN_RETRY: Duration = Duration::from_millis(20);
const VIDEO_FIFO: &str = "video.in";
const AUDIO_FIFO: &str = "audio.in";

/// Terminal states of a mux job. While the supervising task is pending the
/// job is running; it resolves to `Ok(())` or one of these.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("ffmpeg exited with code {0}")]
    Exit(i32),
    #[error("{0}")]
    Runtime(String),
    #[error("client went away")]
    Cancelled,
}

pub type MuxOutcome = Result<(), MuxError>;

#[derive(Debug, Clone)]
pub struct Muxer {
    program: PathBuf,
}

/// Per-request scratch directory; removing it deletes both FIFOs.
struct MuxInputs {
    _dir: TempDir,
    video: PathBuf,
    audio: PathBuf,
}

impl MuxInputs {
    fn create() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("tubefetch-mux-").tempdir()?;
        let video = dir.path().join(VIDEO_FIFO);
        let audio = dir.path().join(AUDIO_FIFO);
        for path in [&video, &audio] {
            mkfifo(path.as_path(), Mode::S_IRUSR | Mode::S_IWUSR).map_err(io::Error::from)?;
        }
        Ok(Self {
            _dir: dir,
            video,
            audio,
        })
    }
}

/// Aborts the supervising task when the response body is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Muxer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Argument list for one mux job: first input's video track copied, second
    /// input's audio track re-encoded for the target container.
    pub fn args(target: MuxTarget, video_input: &Path, audio_input: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-nostdin",
            "-nostats",
            "-loglevel",
            "error",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push("-i".into());
        args.push(video_input.into());
        args.push("-i".into());
        args.push(audio_input.into());
        for arg in ["-map", "0:v", "-map", "1:a", "-c:v", "copy", "-c:a"] {
            args.push(arg.into());
        }
        args.push(target.audio_encoder().into());
        if target.is_fragmented() {
            args.push("-movflags".into());
            args.push("frag_keyframe+empty_moov".into());
        }
        args.push("-f".into());
        args.push(target.muxer().into());
        args.push("pipe:1".into());
        args
    }

    /// Starts ffmpeg and returns its output as a byte stream. Only setup and
    /// spawn failures are reported here; anything that goes wrong later
    /// surfaces as an `Err` item at the end of the stream.
    pub fn spawn(
        &self,
        video: ByteStream,
        audio: ByteStream,
        target: MuxTarget,
    ) -> Result<ByteStream, MuxError> {
        let spawn_error = |source: io::Error| MuxError::Spawn {
            program: self.program.display().to_string(),
            source,
        };

        let inputs = MuxInputs::create().map_err(spawn_error)?;
        let mut child = Command::new(&self.program)
            .args(Self::args(target, &inputs.video, &inputs.audio))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(io::Error::other("ffmpeg stdout was not captured")))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_process_stderr(stderr, "ffmpeg"));
        }

        info!(pid = ?child.id(), container = target.extension(), "muxer started");

        let (tx, mut rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let task = tokio::spawn(supervise(child, stdout, video, audio, inputs, tx));
        let guard = AbortOnDrop(task);

        let body = stream! {
            let _guard = guard;
            while let Some(item) = rx.recv().await {
                yield item;
            }
        };
        Ok(Box::pin(body))
    }
}

async fn supervise(
    mut child: Child,
    stdout: ChildStdout,
    video: ByteStream,
    audio: ByteStream,
    inputs: MuxInputs,
    tx: mpsc::Sender<io::Result<Bytes>>,
) {
    match drive(&mut child, stdout, video, audio, &inputs, &tx).await {
        Ok(()) => debug!("muxer finished"),
        Err(MuxError::Cancelled) => debug!("client disconnected during mux"),
        Err(err) => {
            error!(%err, "mux failed, aborting transfer");
            let _ = tx.send(Err(io::Error::other(err.to_string()))).await;
        }
    }
    // `child` is killed on drop if it is still running; `inputs` removes the FIFOs.
}

async fn drive(
    child: &mut Child,
    stdout: ChildStdout,
    video: ByteStream,
    audio: ByteStream,
    inputs: &MuxInputs,
    tx: &mpsc::Sender<io::Result<Bytes>>,
) -> MuxOutcome {
    let pumps = async {
        tokio::try_join!(
            pump(video, &inputs.video, "video"),
            pump(audio, &inputs.audio, "audio"),
        )
        .map(|_| ())
    };
    let output = async {
        forward(stdout, tx).await?;
        let status = child
            .wait()
            .await
            .map_err(|err| MuxError::Runtime(format!("waiting for ffmpeg: {err}")))?;
        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(MuxError::Exit(code)),
            None => {
                warn!(%status, "ffmpeg terminated by signal");
                Ok(())
            }
        }
    };
    tokio::pin!(pumps, output);

    // ffmpeg may exit before the inputs are drained, so the output side
    // decides when the job is over; input failures end it early.
    let mut pumps_done = false;
    loop {
        tokio::select! {
            result = &mut pumps, if !pumps_done => {
                result?;
                pumps_done = true;
            }
            result = &mut output => return result,
        }
    }
}

/// Copies one upstream stream into its FIFO. Dropping the writer at the end
/// is what signals EOF to ffmpeg.
async fn pump(mut upstream: ByteStream, fifo: &Path, track: &'static str) -> MuxOutcome {
    let mut sink = open_fifo_writer(fifo)
        .await
        .map_err(|err| MuxError::Runtime(format!("opening {track} input: {err}")))?;

    while let Some(chunk) = upstream.next().await {
        let chunk =
            chunk.map_err(|err| MuxError::Runtime(format!("{track} upstream failed: {err}")))?;
        if let Err(err) = sink.write_all(&chunk).await {
            if err.kind() == io::ErrorKind::BrokenPipe {
                debug!(track, "muxer closed its input early");
                return Ok(());
            }
            return Err(MuxError::Runtime(format!("writing {track} input: {err}")));
        }
    }
    debug!(track, "upstream finished");
    Ok(())
}

/// Opening a FIFO for writing fails with `ENXIO` until a reader has it open;
/// ffmpeg opens its inputs one after the other, so keep retrying.
async fn open_fifo_writer(path: &Path) -> io::Result<pipe::Sender> {
    loop {
        match pipe::OpenOptions::new().open_sender(path) {
            Ok(sender) => return Ok(sender),
            Err(err) if err.raw_os_error() == Some(Errno::ENXIO as i32) => {
                sleep(FIFO_OPEN_RETRY).await
            }
            Err(err) => return Err(err),
        }
    }
}

async fn forward(stdout: ChildStdout, tx: &mpsc::Sender<io::Result<Bytes>>) -> MuxOutcome {
    let mut chunks = ReaderStream::new(stdout);
    while let Some(chunk) = chunks.next().await {
        let chunk =
            chunk.map_err(|err| MuxError::Runtime(format!("reading ffmpeg output: {err}")))?;
        tx.send(Ok(chunk)).await.map_err(|_| MuxError::Cancelled)?;
    }
    Ok(())
}
