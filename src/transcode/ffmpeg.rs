//! Transcoding engine backed by the external ffmpeg binary

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::Result;

use super::{TranscodeEngine, TranscodeInput, TranscodeRequest, run_pipeline};

/// Codecs whose container cannot be written to a non-seekable pipe; output
/// goes through a temporary file instead.
const NON_STREAMABLE_CODECS: &[&str] = &["ipod"];

/// How often the engine is asked to report progress, in seconds
const STATS_PERIOD: &str = "0.1";

/// Transcoding engine using the external `ffmpeg` binary
///
/// # Examples
///
/// ```no_run
/// use soundfetch::transcode::FfmpegEngine;
///
/// // Create with an explicit path
/// let engine = FfmpegEngine::new("/usr/bin/ffmpeg".into());
///
/// // Or auto-discover from PATH
/// let engine = FfmpegEngine::from_path()
///     .expect("ffmpeg not found in PATH");
/// ```
pub struct FfmpegEngine {
    binary_path: PathBuf,
}

impl FfmpegEngine {
    /// Create a new engine with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find ffmpeg in PATH
    ///
    /// Returns `Some(FfmpegEngine)` if the binary is found, `None` otherwise.
    pub fn from_path() -> Option<Self> {
        which::which("ffmpeg").ok().map(Self::new)
    }
}

/// Build the fixed argument list for one encode
///
/// The engine is kept quiet on its log channel and asked for machine-readable
/// progress on stderr, which the pipeline parses.
fn build_args(input_spec: &str, output_spec: &str, codec: &str, copy_codec: bool) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-loglevel".into(),
        "error".into(),
        "-hide_banner".into(),
        "-i".into(),
        input_spec.into(),
        "-f".into(),
        codec.into(),
        "-progress".into(),
        "pipe:2".into(),
        "-stats_period".into(),
        STATS_PERIOD.into(),
    ];
    if copy_codec {
        args.push("-c".into());
        args.push("copy".into());
    }
    args.push(output_spec.into());
    args
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    async fn transcode(&self, request: TranscodeRequest) -> Result<Vec<u8>> {
        let streamable = !NON_STREAMABLE_CODECS.contains(&request.codec.as_str());

        let input_spec = match &request.input {
            TranscodeInput::Stream { .. } => "-".to_string(),
            TranscodeInput::Url(url) => url.clone(),
        };

        // Non-streamable containers get a fresh path inside a private
        // directory; the engine refuses to overwrite existing files.
        let temp_output = if streamable {
            None
        } else {
            let dir = tempfile::tempdir()?;
            let path = dir.path().join(format!("encode.{}", request.codec));
            Some((dir, path))
        };
        let output_spec = match &temp_output {
            Some((_, path)) => path.to_string_lossy().into_owned(),
            None => "pipe:1".to_string(),
        };

        debug!(
            engine = self.name(),
            codec = %request.codec,
            copy_codec = request.copy_codec,
            streamable,
            "spawning transcoding engine"
        );

        let mut cmd = Command::new(&self.binary_path);
        cmd.args(build_args(
            &input_spec,
            &output_spec,
            &request.codec,
            request.copy_codec,
        ));

        let piped = run_pipeline(
            cmd,
            request.input,
            streamable,
            request.duration_ms,
            &request.reporter,
        )
        .await?;

        match temp_output {
            Some((_dir, path)) => {
                let encoded = tokio::fs::read(&path).await?;
                if let Err(error) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), %error, "failed to remove transcode temp file");
                }
                Ok(encoded)
            }
            None => Ok(piped),
        }
    }

    fn name(&self) -> &'static str {
        "cli-ffmpeg"
    }
}
