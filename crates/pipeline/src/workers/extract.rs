//! Frame extraction.
//!
//! With an ffmpeg binary configured the stage samples frames from the
//! source video and follows ffmpeg's `-progress` output; otherwise it
//! simulates extraction at a fixed per-frame pace.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use vid3d_core::job::ArtifactRef;

use super::write_manifest;
use crate::error::StageError;
use crate::stage::{StageContext, StageInput, StageWorker};

/// Sub-directory of the job work dir holding extracted frames.
pub const FRAMES_DIR: &str = "frames";

#[derive(Debug, Clone)]
pub struct FrameExtractor {
    ffmpeg: Option<PathBuf>,
    frame_delay: Duration,
}

impl FrameExtractor {
    /// `ffmpeg` is used only if it points at an existing file.
    pub fn new(ffmpeg: Option<PathBuf>, frame_delay: Duration) -> Self {
        let ffmpeg = ffmpeg.filter(|path| {
            let found = path.is_file();
            if !found {
                tracing::warn!(path = %path.display(), "ffmpeg not found, extraction will be simulated");
            }
            found
        });
        Self {
            ffmpeg,
            frame_delay,
        }
    }

    pub fn simulated(frame_delay: Duration) -> Self {
        Self {
            ffmpeg: None,
            frame_delay,
        }
    }

    async fn simulate(&self, ctx: &StageContext, total: u32) -> Result<u32, StageError> {
        ctx.emit_frames(0, total);
        for frame in 1..=total {
            ctx.checkpoint()?;
            tokio::time::sleep(self.frame_delay).await;
            ctx.emit_frames(frame, total);
        }
        Ok(total)
    }

    async fn run_ffmpeg(
        &self,
        ffmpeg: &Path,
        source: &Path,
        out_dir: &Path,
        ctx: &StageContext,
        total: u32,
    ) -> Result<u32, StageError> {
        let mut child = Command::new(ffmpeg)
            .args(["-hide_banner", "-nostats", "-y", "-i"])
            .arg(source)
            .args(["-frames:v", &total.to_string(), "-progress", "pipe:1"])
            .arg(out_dir.join("frame_%05d.png"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StageError::failed("ffmpeg stdout unavailable"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| StageError::failed("ffmpeg stderr unavailable"))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        ctx.emit_frames(0, total);
        let mut lines = BufReader::new(stdout).lines();
        let mut extracted = 0;
        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    let _ = child.start_kill();
                    return Err(StageError::Cancelled);
                }
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if let Some(frame) = parse_progress_frame(&line) {
                            extracted = frame.min(total);
                            ctx.emit_frames(extracted, total);
                        }
                    }
                    None => break,
                },
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(StageError::External {
                exit_code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(extracted)
    }
}

#[async_trait]
impl StageWorker for FrameExtractor {
    async fn execute(&self, input: StageInput, ctx: StageContext) -> Result<ArtifactRef, StageError> {
        if !tokio::fs::try_exists(&input.source).await? {
            return Err(StageError::failed(format!(
                "video file not found: {}",
                input.source.display()
            )));
        }

        let total = ctx.options().frame_budget();
        let out_dir = ctx.work_dir().join(FRAMES_DIR);
        tokio::fs::create_dir_all(&out_dir).await?;

        let (extracted, method) = match &self.ffmpeg {
            Some(ffmpeg) => (
                self.run_ffmpeg(ffmpeg, &input.source, &out_dir, &ctx, total)
                    .await?,
                "ffmpeg",
            ),
            None => (self.simulate(&ctx, total).await?, "simulated"),
        };
        ctx.checkpoint()?;

        tracing::debug!(job_id = %ctx.job_id(), extracted, method, "Frames extracted");

        let manifest = json!({
            "jobId": ctx.job_id(),
            "source": input.source,
            "method": method,
            "framesRequested": total,
            "framesExtracted": extracted,
            "directory": out_dir,
            "generatedAt": Utc::now(),
        });
        write_manifest(&out_dir.join("manifest.json"), &manifest).await?;
        Ok(ArtifactRef::Path(out_dir))
    }
}

/// Frame counter from one line of ffmpeg's `-progress` output
/// (`frame=42`).
pub fn parse_progress_frame(line: &str) -> Option<u32> {
    line.trim()
        .strip_prefix("frame=")
        .and_then(|v| v.trim().parse().ok())
}
