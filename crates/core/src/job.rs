//! Job record model and its status state machine.
//!
//! A [`JobRecord`] is created `Queued`, moves through `Running(i)` for each
//! stage in order, and ends in exactly one terminal state (`Completed` or
//! `Failed`). Terminal records reject every further mutation.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::options::StageOptions;
use crate::scheduling::ResourceClass;
use crate::types::{JobId, Timestamp};
use crate::variant::PipelineVariant;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running { stage_index: usize },
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Label used on the wire: `queued`, `processing`, `completed`, `failed`.
    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running { .. } => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `to` is allowed.
    ///
    /// - Queued -> Running(0), Failed
    /// - Running(i) -> Running(i + 1), Completed, Failed
    /// - Completed, Failed -> nothing
    pub fn can_transition(&self, to: &JobStatus) -> bool {
        match (self, to) {
            (JobStatus::Queued, JobStatus::Running { stage_index: 0 }) => true,
            (JobStatus::Queued, JobStatus::Failed) => true,
            (JobStatus::Running { stage_index: a }, JobStatus::Running { stage_index: b }) => {
                *b == a + 1
            }
            (JobStatus::Running { .. }, JobStatus::Completed | JobStatus::Failed) => true,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress, artifacts, errors
// ---------------------------------------------------------------------------

/// Progress local to the active stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageProgress {
    pub stage: Option<String>,
    pub stage_index: Option<usize>,
    /// Fraction in `[0, 1]` local to `stage`.
    pub fraction: f64,
    pub current_frame: Option<u32>,
    pub total_frames: Option<u32>,
}

/// Opaque reference to the output of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ArtifactRef {
    /// A file or directory on local disk.
    Path(PathBuf),
    /// A small in-memory handle (identifier, URL, inline summary).
    Inline(String),
}

impl ArtifactRef {
    pub fn as_path(&self) -> Option<&std::path::Path> {
        match self {
            ArtifactRef::Path(p) => Some(p.as_path()),
            ArtifactRef::Inline(_) => None,
        }
    }
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    StageFailure,
    Cancelled,
    TimedOut,
}

impl FailureKind {
    /// Cause string recorded for signal-driven failures.
    pub fn default_cause(&self) -> &'static str {
        match self {
            FailureKind::StageFailure => "stage failed",
            FailureKind::Cancelled => "cancelled",
            FailureKind::TimedOut => "timeout",
        }
    }
}

/// Error attached to a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Stage that produced the failure, if one was active.
    pub stage: Option<String>,
    pub cause: String,
    pub kind: FailureKind,
}

impl JobError {
    pub fn stage_failure(stage: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            cause: cause.into(),
            kind: FailureKind::StageFailure,
        }
    }

    /// Failure caused by a cancellation signal or timeout.
    pub fn interrupted(kind: FailureKind, stage: Option<String>) -> Self {
        Self {
            stage,
            cause: kind.default_cause().to_string(),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

/// Everything the caller submitted for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub source: PathBuf,
    pub options: StageOptions,
    pub priority: i32,
    pub resource_class: ResourceClass,
}

/// Mutable state of one processing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub variant: PipelineVariant,
    pub request: JobRequest,
    pub status: JobStatus,
    pub stage_progress: StageProgress,
    pub overall_progress: f64,
    pub artifacts: IndexMap<String, ArtifactRef>,
    pub error: Option<JobError>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl JobRecord {
    /// Create a `Queued` record. The variant is validated by the caller.
    pub fn new(id: JobId, variant: PipelineVariant, request: JobRequest) -> Self {
        Self {
            id,
            variant,
            request,
            status: JobStatus::Queued,
            stage_progress: StageProgress::default(),
            overall_progress: 0.0,
            artifacts: IndexMap::new(),
            error: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition(&to) {
            return Err(CoreError::Conflict(format!(
                "Job {} cannot move from {} to {}",
                self.id,
                self.status.label(),
                to.label()
            )));
        }
        self.status = to;
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), CoreError> {
        if self.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Job {} is already {}",
                self.id,
                self.status.label()
            )));
        }
        Ok(())
    }

    /// Enter stage `index`. Sets `started_at` on the first stage.
    pub fn start_stage(&mut self, index: usize) -> Result<(), CoreError> {
        let name = self
            .variant
            .stage_name(index)
            .ok_or_else(|| {
                CoreError::Internal(format!("Job {} has no stage {index}", self.id))
            })?
            .to_string();

        self.transition(JobStatus::Running { stage_index: index })?;
        if self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now());
        }
        self.stage_progress = StageProgress {
            stage: Some(name),
            stage_index: Some(index),
            ..StageProgress::default()
        };
        Ok(())
    }

    /// Record a progress sample for the active stage.
    pub fn record_progress(
        &mut self,
        fraction: f64,
        overall: f64,
        frames: Option<(u32, u32)>,
    ) -> Result<(), CoreError> {
        self.ensure_active()?;
        self.stage_progress.fraction = fraction;
        if let Some((current, total)) = frames {
            self.stage_progress.current_frame = Some(current);
            self.stage_progress.total_frames = Some(total);
        }
        self.overall_progress = overall;
        Ok(())
    }

    /// Store the output of a finished stage. Artifacts are never replaced.
    pub fn record_artifact(
        &mut self,
        stage: impl Into<String>,
        artifact: ArtifactRef,
    ) -> Result<(), CoreError> {
        self.ensure_active()?;
        let stage = stage.into();
        if self.artifacts.contains_key(&stage) {
            return Err(CoreError::Conflict(format!(
                "Job {} already has an artifact for stage '{stage}'",
                self.id
            )));
        }
        self.artifacts.insert(stage, artifact);
        Ok(())
    }

    /// Mark the job completed with full progress.
    pub fn complete(&mut self) -> Result<(), CoreError> {
        self.transition(JobStatus::Completed)?;
        self.overall_progress = 1.0;
        self.stage_progress.fraction = 1.0;
        self.completed_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Mark the job failed.
    pub fn fail(&mut self, error: JobError) -> Result<(), CoreError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error);
        self.completed_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Artifact of the last stage that produced one.
    pub fn final_artifact(&self) -> Option<(&String, &ArtifactRef)> {
        self.artifacts.last()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn record() -> JobRecord {
        JobRecord::new(
            JobId::new(),
            PipelineVariant::standard(),
            JobRequest {
                source: PathBuf::from("/tmp/in.mp4"),
                options: StageOptions::default(),
                priority: 0,
                resource_class: ResourceClass::Cpu,
            },
        )
    }

    #[test]
    fn new_record_is_queued() {
        let r = record();
        assert_eq!(r.status, JobStatus::Queued);
        assert_eq!(r.overall_progress, 0.0);
        assert!(r.started_at.is_none());
        assert!(r.artifacts.is_empty());
    }

    #[test]
    fn stages_must_advance_in_order() {
        let mut r = record();
        assert_matches!(r.start_stage(1), Err(CoreError::Conflict(_)));
        r.start_stage(0).unwrap();
        assert!(r.started_at.is_some());
        assert_matches!(r.start_stage(2), Err(CoreError::Conflict(_)));
        r.start_stage(1).unwrap();
        assert_eq!(r.status, JobStatus::Running { stage_index: 1 });
        assert_eq!(r.stage_progress.stage.as_deref(), Some("estimating"));
    }

    #[test]
    fn unknown_stage_index_is_internal_error() {
        let mut r = record();
        assert_matches!(r.start_stage(7), Err(CoreError::Internal(_)));
    }

    #[test]
    fn queued_cannot_complete_directly() {
        let mut r = record();
        assert_matches!(r.complete(), Err(CoreError::Conflict(_)));
    }

    #[test]
    fn terminal_status_is_final() {
        let mut r = record();
        r.start_stage(0).unwrap();
        r.complete().unwrap();
        let completed_at = r.completed_at;
        assert!(completed_at.is_some());
        assert_eq!(r.overall_progress, 1.0);

        assert_matches!(
            r.fail(JobError::stage_failure("x", "late")),
            Err(CoreError::Conflict(_))
        );
        assert_matches!(r.record_progress(0.5, 0.5, None), Err(CoreError::Conflict(_)));
        assert_matches!(
            r.record_artifact("extra", ArtifactRef::Inline("x".into())),
            Err(CoreError::Conflict(_))
        );
        assert_eq!(r.completed_at, completed_at);
        assert_eq!(r.status, JobStatus::Completed);
    }

    #[test]
    fn queued_job_can_fail_when_cancelled() {
        let mut r = record();
        r.fail(JobError::interrupted(FailureKind::Cancelled, None))
            .unwrap();
        let err = r.error.as_ref().unwrap();
        assert_eq!(err.cause, "cancelled");
        assert_eq!(err.kind, FailureKind::Cancelled);
        assert!(err.stage.is_none());
    }

    #[test]
    fn artifacts_keep_insertion_order_and_reject_duplicates() {
        let mut r = record();
        r.start_stage(0).unwrap();
        r.record_artifact("extracting", ArtifactRef::Inline("a".into()))
            .unwrap();
        r.start_stage(1).unwrap();
        r.record_artifact("estimating", ArtifactRef::Inline("b".into()))
            .unwrap();
        assert_matches!(
            r.record_artifact("extracting", ArtifactRef::Inline("c".into())),
            Err(CoreError::Conflict(_))
        );
        let keys: Vec<_> = r.artifacts.keys().cloned().collect();
        assert_eq!(keys, vec!["extracting", "estimating"]);
        assert_eq!(r.final_artifact().unwrap().0, "estimating");
    }

    #[test]
    fn frame_detail_is_recorded() {
        let mut r = record();
        r.start_stage(0).unwrap();
        r.record_progress(0.5, 0.15, Some((30, 60))).unwrap();
        assert_eq!(r.stage_progress.current_frame, Some(30));
        assert_eq!(r.stage_progress.total_frames, Some(60));
        assert_eq!(r.overall_progress, 0.15);
    }

    #[test]
    fn status_labels() {
        assert_eq!(JobStatus::Queued.label(), "queued");
        assert_eq!(JobStatus::Running { stage_index: 2 }.label(), "processing");
        assert_eq!(JobStatus::Failed.label(), "failed");
    }
}
