//! External transcoding.
//!
//! [`Transcoder`] is the seam between the normalizer and whatever actually
//! converts audio. Production uses [`FfmpegTranscoder`], which runs `ffmpeg`
//! as a child process through `tokio::process`, so a long conversion only
//! parks the request that asked for it.

use crate::config::TranscoderConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert `input` into `format`, writing the result to `output`.
    ///
    /// The error message is shown to the client as-is.
    async fn transcode(&self, input: &Path, output: &Path, format: &str) -> Result<()>;
}

pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    codec: String,
    timeout: Option<Duration>,
}

impl FfmpegTranscoder {
    pub fn new(config: &TranscoderConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            codec: config.codec.clone(),
            timeout: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
        }
    }

    fn command(&self, input: &Path, output: &Path, format: &str) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(input)
            .args(["-vn", "-acodec", self.codec.as_str(), "-f", format])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // Only reached when the timeout fires and drops the child.
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path, format: &str) -> Result<()> {
        debug!(input = %input.display(), output = %output.display(), format, "Running ffmpeg");

        let mut cmd = self.command(input, output, format);
        let run = cmd.output();
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| anyhow!("ffmpeg timed out after {}s", limit.as_secs()))?,
            None => run.await,
        };
        let output = result.with_context(|| format!("Failed to execute {}", self.ffmpeg_path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return Err(if stderr.is_empty() {
                anyhow!("ffmpeg exited with {}", output.status)
            } else {
                anyhow!("ffmpeg exited with {}: {}", output.status, stderr)
            });
        }

        Ok(())
    }
}

/// Stand-in transcoders for pipeline and handler tests.
#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// "Converts" by copying bytes; counts how often it ran.
    #[derive(Default)]
    pub struct CopyTranscoder {
        pub calls: AtomicUsize,
    }

    impl CopyTranscoder {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transcoder for CopyTranscoder {
        async fn transcode(&self, input: &Path, output: &Path, _format: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::copy(input, output).await?;
            Ok(())
        }
    }

    /// Converts by copying, then deletes the input out from under the caller.
    pub struct VanishingInputTranscoder;

    #[async_trait]
    impl Transcoder for VanishingInputTranscoder {
        async fn transcode(&self, input: &Path, output: &Path, _format: &str) -> Result<()> {
            tokio::fs::copy(input, output).await?;
            tokio::fs::remove_file(input).await?;
            Ok(())
        }
    }

    /// Writes half an output file and then fails, like a crashing encoder.
    pub struct FailingTranscoder {
        pub message: String,
    }

    #[async_trait]
    impl Transcoder for FailingTranscoder {
        async fn transcode(&self, _input: &Path, output: &Path, _format: &str) -> Result<()> {
            tokio::fs::write(output, b"truncated").await?;
            Err(anyhow!("{}", self.message))
        }
    }
}
