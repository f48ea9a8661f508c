//! Drives one job through its variant's stages.
//!
//! Stages run strictly in order. Each stage executes in its own task so a
//! panicking worker fails only its job; while the task runs, the
//! orchestrator drains the stage's progress channel, maps every sample into
//! overall progress and publishes it. The job always ends in exactly one
//! terminal state, and the terminal event is published last.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use vid3d_core::error::CoreError;
use vid3d_core::job::{ArtifactRef, FailureKind, JobError, JobStatus};
use vid3d_core::progress::{overall_progress, MonotonicProgress, ProgressStep};
use vid3d_core::types::JobId;
use vid3d_events::{JobEvent, JobEventKind, ProgressReporter};

use crate::control::JobControl;
use crate::error::StageError;
use crate::registry::VariantRegistry;
use crate::stage::{ProgressSample, StageContext, StageInput};
use crate::store::JobStore;

pub struct PipelineOrchestrator {
    store: Arc<JobStore>,
    reporter: Arc<ProgressReporter>,
    registry: Arc<VariantRegistry>,
    work_root: PathBuf,
}

/// Stage currently being driven, for progress bookkeeping.
struct ActiveStage<'a> {
    index: usize,
    name: &'a str,
    weights: &'a [f64],
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<JobStore>,
        reporter: Arc<ProgressReporter>,
        registry: Arc<VariantRegistry>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            reporter,
            registry,
            work_root: work_root.into(),
        }
    }

    /// Directory holding a job's intermediate artifacts.
    pub fn job_dir(&self, job_id: JobId) -> PathBuf {
        self.work_root.join(job_id.to_string())
    }

    /// Run every stage of the job and return its terminal status.
    ///
    /// `Err` is returned only when the store rejects a bookkeeping update;
    /// stage failures, panics and cancellation all end in `Ok(Failed)`.
    pub async fn run(&self, job_id: JobId, control: JobControl) -> Result<JobStatus, CoreError> {
        let record = self.store.get(job_id).await?;
        let variant = record.variant;

        let Some(stages) = self.registry.stages(&variant.name) else {
            return self
                .fail(job_id, setup_failure(format!("unknown variant '{}'", variant.name)))
                .await;
        };
        let matches_record = stages.len() == variant.stage_count()
            && stages
                .iter()
                .zip(&variant.stages)
                .all(|(def, spec)| def.spec.name == spec.name);
        if !matches_record {
            return self
                .fail(
                    job_id,
                    setup_failure(format!("variant '{}' no longer matches the job", variant.name)),
                )
                .await;
        }

        let job_dir = self.job_dir(job_id);
        if let Err(e) = tokio::fs::create_dir_all(&job_dir).await {
            return self
                .fail(job_id, setup_failure(format!("cannot create work directory: {e}")))
                .await;
        }

        tracing::info!(
            job_id = %job_id,
            variant = %variant.name,
            stages = stages.len(),
            "Job started",
        );
        self.publish(job_id, JobEventKind::Started).await;

        let weights = variant.weights();
        let options = Arc::new(record.request.options);
        let mut progress = MonotonicProgress::new();
        let mut previous: Option<ArtifactRef> = None;

        for (index, definition) in stages.iter().enumerate() {
            let name = definition.spec.name.as_str();

            // Lets a cancel sent on the previous StageCompleted land before the next stage.
            if index > 0 {
                tokio::task::yield_now().await;
            }
            if let Some(kind) = control.reason() {
                return self.interrupt(job_id, kind, None).await;
            }

            self.store.update(job_id, |r| r.start_stage(index)).await?;
            self.publish(
                job_id,
                JobEventKind::StageStarted {
                    stage: name.to_string(),
                    stage_index: index,
                },
            )
            .await;
            tracing::debug!(job_id = %job_id, stage = name, index, "Stage started");
            let started = Instant::now();

            let (tx, mut rx) = mpsc::unbounded_channel();
            let ctx = StageContext::new(
                job_id,
                name,
                index,
                Arc::clone(&options),
                job_dir.clone(),
                control.token(),
                tx,
            );
            let input = StageInput {
                source: record.request.source.clone(),
                previous: previous.clone(),
            };
            let worker = Arc::clone(&definition.worker);
            let mut handle = tokio::spawn(async move { worker.execute(input, ctx).await });

            let active = ActiveStage {
                index,
                name,
                weights: &weights,
            };
            let joined = loop {
                tokio::select! {
                    biased;
                    Some(sample) = rx.recv() => {
                        self.apply_sample(job_id, &active, &mut progress, sample).await;
                    }
                    joined = &mut handle => break joined,
                }
            };
            // Samples sent just before the stage returned.
            while let Ok(sample) = rx.try_recv() {
                self.apply_sample(job_id, &active, &mut progress, sample).await;
            }

            let artifact = match joined {
                Err(join_error) => {
                    let cause = if join_error.is_panic() {
                        "stage panicked"
                    } else {
                        "stage task aborted"
                    };
                    return self
                        .fail(job_id, JobError::stage_failure(name, cause))
                        .await;
                }
                Ok(Err(StageError::Cancelled)) => {
                    let kind = control.reason().unwrap_or(FailureKind::Cancelled);
                    return self.interrupt(job_id, kind, Some(name.to_string())).await;
                }
                Ok(Err(error)) => {
                    if let Some(kind) = control.reason() {
                        return self.interrupt(job_id, kind, Some(name.to_string())).await;
                    }
                    return self
                        .fail(job_id, JobError::stage_failure(name, error.to_string()))
                        .await;
                }
                Ok(Ok(artifact)) => artifact,
            };

            if let Some(kind) = control.reason() {
                tracing::info!(
                    job_id = %job_id,
                    stage = name,
                    "Discarding artifact of stage that finished after cancellation",
                );
                return self.interrupt(job_id, kind, Some(name.to_string())).await;
            }

            // A stage that never reported 1.0 still counts as fully done.
            let stage_end = overall_progress(&weights, index, 1.0);
            let advanced = stage_end > progress.current();
            progress.offer(stage_end);
            let overall = progress.current();

            self.store
                .update(job_id, |r| {
                    r.record_progress(1.0, overall, None)?;
                    r.record_artifact(name, artifact.clone())
                })
                .await?;
            if advanced {
                self.publish(
                    job_id,
                    JobEventKind::Progress {
                        stage: name.to_string(),
                        stage_index: index,
                        fraction: 1.0,
                        overall,
                        current_frame: None,
                        total_frames: None,
                    },
                )
                .await;
            }
            self.publish(
                job_id,
                JobEventKind::StageCompleted {
                    stage: name.to_string(),
                    artifact: artifact.clone(),
                },
            )
            .await;
            tracing::info!(
                job_id = %job_id,
                stage = name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stage completed",
            );

            previous = Some(artifact);
        }

        self.store.update(job_id, |r| r.complete()).await?;
        self.publish(job_id, JobEventKind::Completed).await;
        tracing::info!(job_id = %job_id, "Job completed");
        Ok(JobStatus::Completed)
    }

    async fn apply_sample(
        &self,
        job_id: JobId,
        active: &ActiveStage<'_>,
        progress: &mut MonotonicProgress,
        sample: ProgressSample,
    ) {
        let offered = overall_progress(active.weights, active.index, sample.fraction);
        let overall = match progress.offer(offered) {
            ProgressStep::Advanced(overall) => overall,
            ProgressStep::Regressed { current, offered } => {
                tracing::warn!(
                    job_id = %job_id,
                    stage = active.name,
                    current,
                    offered,
                    "Stage reported regressing progress, ignored",
                );
                return;
            }
        };

        if let Err(e) = self
            .store
            .update(job_id, |r| r.record_progress(sample.fraction, overall, sample.frames))
            .await
        {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record progress");
            return;
        }

        let (current_frame, total_frames) = match sample.frames {
            Some((current, total)) => (Some(current), Some(total)),
            None => (None, None),
        };
        self.publish(
            job_id,
            JobEventKind::Progress {
                stage: active.name.to_string(),
                stage_index: active.index,
                fraction: sample.fraction,
                overall,
                current_frame,
                total_frames,
            },
        )
        .await;
    }

    async fn interrupt(
        &self,
        job_id: JobId,
        kind: FailureKind,
        stage: Option<String>,
    ) -> Result<JobStatus, CoreError> {
        self.fail(job_id, JobError::interrupted(kind, stage)).await
    }

    async fn fail(&self, job_id: JobId, error: JobError) -> Result<JobStatus, CoreError> {
        tracing::warn!(
            job_id = %job_id,
            stage = error.stage.as_deref().unwrap_or("-"),
            cause = %error.cause,
            kind = ?error.kind,
            "Job failed",
        );
        self.store
            .update(job_id, |r| r.fail(error.clone()))
            .await?;
        self.publish(job_id, JobEventKind::Failed { error }).await;
        Ok(JobStatus::Failed)
    }

    async fn publish(&self, job_id: JobId, kind: JobEventKind) {
        self.reporter.publish(JobEvent::new(job_id, kind)).await;
    }
}

fn setup_failure(cause: String) -> JobError {
    JobError {
        stage: None,
        cause,
        kind: FailureKind::StageFailure,
    }
}
