//! The contract between the orchestrator and a stage worker.
//!
//! A worker receives the job's source plus the previous stage's artifact and
//! a [`StageContext`]. It reports local progress through the context (any
//! number of times, from any task) and returns its artifact. Progress
//! samples travel over an unbounded channel, so emitting never blocks the
//! stage and never fails.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use vid3d_core::job::ArtifactRef;
use vid3d_core::options::StageOptions;
use vid3d_core::progress::clamp_fraction;
use vid3d_core::types::JobId;

use crate::error::StageError;

/// One unit of work in a pipeline variant.
#[async_trait]
pub trait StageWorker: Send + Sync {
    async fn execute(&self, input: StageInput, ctx: StageContext) -> Result<ArtifactRef, StageError>;
}

/// What a stage works on.
#[derive(Debug, Clone)]
pub struct StageInput {
    /// The job's uploaded source file.
    pub source: PathBuf,
    /// Artifact of the previous stage. `None` for the first stage.
    pub previous: Option<ArtifactRef>,
}

/// A progress report from a running stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// Local fraction, already clamped to `[0, 1]`.
    pub fraction: f64,
    /// `(current, total)` frame counters when the stage counts frames.
    pub frames: Option<(u32, u32)>,
}

/// Handle a stage uses to learn about its job and report progress.
#[derive(Debug, Clone)]
pub struct StageContext {
    job_id: JobId,
    stage: String,
    stage_index: usize,
    options: Arc<StageOptions>,
    work_dir: PathBuf,
    cancel: CancellationToken,
    progress: mpsc::UnboundedSender<ProgressSample>,
}

impl StageContext {
    pub(crate) fn new(
        job_id: JobId,
        stage: impl Into<String>,
        stage_index: usize,
        options: Arc<StageOptions>,
        work_dir: PathBuf,
        cancel: CancellationToken,
        progress: mpsc::UnboundedSender<ProgressSample>,
    ) -> Self {
        Self {
            job_id,
            stage: stage.into(),
            stage_index,
            options,
            work_dir,
            cancel,
            progress,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn stage_index(&self) -> usize {
        self.stage_index
    }

    pub fn options(&self) -> &StageOptions {
        &self.options
    }

    /// Per-job directory for intermediate artifacts. Created before the
    /// first stage runs.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Report local progress. Values outside `[0, 1]` are clamped.
    pub fn emit(&self, fraction: f64) {
        self.send(ProgressSample {
            fraction: clamp_fraction(fraction),
            frames: None,
        });
    }

    /// Report progress as a frame count. A zero total reads as done.
    pub fn emit_frames(&self, current: u32, total: u32) {
        let fraction = if total == 0 {
            1.0
        } else {
            f64::from(current.min(total)) / f64::from(total)
        };
        self.send(ProgressSample {
            fraction,
            frames: Some((current.min(total), total)),
        });
    }

    fn send(&self, sample: ProgressSample) {
        // The receiver is gone once the orchestrator moved on; late samples
        // are meaningless then.
        let _ = self.progress.send(sample);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the job is cancelled or times out.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// `Err(StageError::Cancelled)` once the job has been cancelled. Stages
    /// call this between internal steps.
    pub fn checkpoint(&self) -> Result<(), StageError> {
        if self.cancel.is_cancelled() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Context wired to a fresh channel, for exercising workers directly.
    pub fn context(
        work_dir: &Path,
        options: StageOptions,
    ) -> (
        StageContext,
        mpsc::UnboundedReceiver<ProgressSample>,
        CancellationToken,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let ctx = StageContext::new(
            JobId::new(),
            "testing",
            0,
            Arc::new(options),
            work_dir.to_path_buf(),
            cancel.clone(),
            tx,
        );
        (ctx, rx, cancel)
    }

    pub fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressSample>) -> Vec<ProgressSample> {
        let mut out = Vec::new();
        while let Ok(sample) = rx.try_recv() {
            out.push(sample);
        }
        out
    }
}
