//! Job lifecycle facade: submission, admission, launch, cancellation and
//! queries, wiring the store, scheduler, orchestrator and reporter
//! together.
//!
//! Two long-lived tasks are started with the service:
//!
//! - the dispatcher, which launches jobs the scheduler admits from its
//!   queue;
//! - the adaptation loop, which samples memory usage and adjusts the
//!   concurrency limit (skipped when the interval is zero).
//!
//! Both stop when the cancellation token passed to [`JobService::start`]
//! fires. Jobs already running are left to finish.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use vid3d_core::error::CoreError;
use vid3d_core::job::{FailureKind, JobError, JobRecord, JobRequest, JobStatus};
use vid3d_core::options::StageOptions;
use vid3d_core::scheduling::{Admission, ResourceClass, PRIORITY_NORMAL};
use vid3d_core::types::JobId;
use vid3d_core::variant::PipelineVariant;
use vid3d_events::{JobEvent, JobEventKind, JobSubscription, ProgressReporter};

use crate::config::PipelineConfig;
use crate::control::JobControl;
use crate::orchestrator::PipelineOrchestrator;
use crate::registry::VariantRegistry;
use crate::scheduler::{MemorySampler, ResourceScheduler, SchedulerSnapshot, SystemMemorySampler};
use crate::store::{JobStore, StatusCounts};

/// A request to process one uploaded video.
#[derive(Debug, Clone)]
pub struct SubmitJob {
    /// Variant name; the configured default when `None`.
    pub variant: Option<String>,
    pub source: PathBuf,
    pub options: StageOptions,
    pub priority: i32,
    pub resource_class: ResourceClass,
}

impl SubmitJob {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            variant: None,
            source: source.into(),
            options: StageOptions::default(),
            priority: PRIORITY_NORMAL,
            resource_class: ResourceClass::default(),
        }
    }
}

/// Outcome of a successful submission.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Snapshot taken at creation, before any stage ran.
    pub job: JobRecord,
    pub admission: Admission,
}

pub struct JobService {
    config: PipelineConfig,
    store: Arc<JobStore>,
    reporter: Arc<ProgressReporter>,
    registry: Arc<VariantRegistry>,
    scheduler: Arc<ResourceScheduler>,
    orchestrator: PipelineOrchestrator,
    controls: RwLock<HashMap<JobId, JobControl>>,
}

impl JobService {
    /// Build the service and start its background tasks, sampling memory
    /// with [`SystemMemorySampler`].
    pub fn start(
        config: PipelineConfig,
        registry: VariantRegistry,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, CoreError> {
        Self::start_with_sampler(config, registry, Arc::new(SystemMemorySampler::new()), cancel)
    }

    pub fn start_with_sampler(
        config: PipelineConfig,
        registry: VariantRegistry,
        sampler: Arc<dyn MemorySampler>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, CoreError> {
        config.pressure.validate()?;
        if !registry.contains(&config.default_variant) {
            return Err(CoreError::Validation(format!(
                "Default variant '{}' is not registered",
                config.default_variant
            )));
        }

        let store = Arc::new(JobStore::new());
        let reporter = Arc::new(ProgressReporter::default());
        let registry = Arc::new(registry);
        let (scheduler, admissions) = ResourceScheduler::new(
            config.max_concurrent_jobs,
            config.hardware_max_concurrent,
            config.pressure,
        );
        let scheduler = Arc::new(scheduler);
        let orchestrator = PipelineOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&reporter),
            Arc::clone(&registry),
            config.work_dir.clone(),
        );

        let service = Arc::new(Self {
            config,
            store,
            reporter,
            registry,
            scheduler,
            orchestrator,
            controls: RwLock::new(HashMap::new()),
        });

        tokio::spawn(Arc::clone(&service).run_dispatcher(admissions, cancel.clone()));
        if !service.config.adapt_interval.is_zero() {
            tokio::spawn(Arc::clone(&service.scheduler).run_adaptation(
                sampler,
                service.config.adapt_interval,
                cancel,
            ));
        }

        tracing::info!(
            default_variant = %service.config.default_variant,
            max_concurrent = service.config.max_concurrent_jobs,
            hardware_max = service.config.hardware_max_concurrent,
            work_dir = %service.config.work_dir.display(),
            "Job service started",
        );
        Ok(service)
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Validate, record and schedule a job.
    ///
    /// An unknown variant or invalid options fail before any record is
    /// created.
    pub async fn submit(self: &Arc<Self>, request: SubmitJob) -> Result<Submission, CoreError> {
        let name = request
            .variant
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.config.default_variant);
        let variant = self.registry.variant(name).ok_or_else(|| {
            let known: Vec<&str> = self.registry.variants().map(|v| v.name.as_str()).collect();
            CoreError::Validation(format!(
                "Unknown pipeline variant '{name}', expected one of: {}",
                known.join(", ")
            ))
        })?;
        request.options.check()?;

        let job = self
            .store
            .create(
                variant,
                JobRequest {
                    source: request.source,
                    options: request.options,
                    priority: request.priority,
                    resource_class: request.resource_class,
                },
            )
            .await?;
        let admission = self.schedule(&job).await?;
        Ok(Submission { job, admission })
    }

    /// Hand a freshly created record to the scheduler, launching it or
    /// announcing its queue position. The record is discarded if admission
    /// fails.
    async fn schedule(self: &Arc<Self>, job: &JobRecord) -> Result<Admission, CoreError> {
        let job_id = job.id;
        self.reporter.register(job_id).await;
        // A cancel that arrived since the record was created left its control here.
        self.controls.write().await.entry(job_id).or_default();

        let priority = job.request.priority;
        let admission = match self
            .scheduler
            .admit_or_queue(job_id, priority, job.request.resource_class)
            .await
        {
            Ok(admission) => admission,
            Err(e) => {
                self.controls.write().await.remove(&job_id);
                self.reporter.unregister(job_id).await;
                self.store.discard(job_id).await;
                return Err(e);
            }
        };

        tracing::info!(
            job_id = %job_id,
            variant = %job.variant.name,
            priority,
            admission = ?admission,
            "Job submitted",
        );

        match admission {
            Admission::Started => self.launch(job_id),
            Admission::Queued(position) => {
                self.reporter
                    .publish(JobEvent::new(job_id, JobEventKind::Queued { position }))
                    .await;
            }
        }
        Ok(admission)
    }

    /// Cancel a job that has not finished.
    ///
    /// A queued job fails immediately. A running job is signalled and fails
    /// once its current stage returns. Cancelling a finished job is a
    /// conflict.
    pub async fn cancel(&self, job_id: JobId) -> Result<JobRecord, CoreError> {
        let record = self.store.get(job_id).await?;
        if record.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Job {job_id} is already {}",
                record.status.label()
            )));
        }

        if self.scheduler.withdraw(job_id).await {
            let error = JobError::interrupted(FailureKind::Cancelled, None);
            self.store
                .update(job_id, |r| r.fail(error.clone()))
                .await?;
            self.controls.write().await.remove(&job_id);
            self.reporter
                .publish(JobEvent::new(job_id, JobEventKind::Failed { error }))
                .await;
            tracing::info!(job_id = %job_id, "Queued job cancelled");
        } else {
            let control = {
                let mut controls = self.controls.write().await;
                if record.status == JobStatus::Queued {
                    // Not yet with the scheduler: the run picks this control up
                    // and fails before its first stage.
                    Some(controls.entry(job_id).or_default().clone())
                } else {
                    controls.get(&job_id).cloned()
                }
            };
            if let Some(control) = control {
                if control.cancel(FailureKind::Cancelled) {
                    tracing::info!(job_id = %job_id, "Cancellation requested");
                }
            }
        }

        self.store.get(job_id).await
    }

    /// Delete a finished job's record and intermediate artifacts.
    pub async fn remove(&self, job_id: JobId) -> Result<JobRecord, CoreError> {
        let record = self.store.remove(job_id).await?;
        self.reporter.unregister(job_id).await;

        let dir = self.orchestrator.job_dir(job_id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to remove job work directory");
            }
        }
        tracing::info!(job_id = %job_id, "Job removed");
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get(&self, job_id: JobId) -> Result<JobRecord, CoreError> {
        self.store.get(job_id).await
    }

    pub async fn list(&self) -> Vec<JobRecord> {
        self.store.list_all().await
    }

    pub async fn counts(&self) -> StatusCounts {
        self.store.count_by_status().await
    }

    pub async fn queue_position(&self, job_id: JobId) -> Option<usize> {
        self.scheduler.queue_position(job_id).await
    }

    pub async fn scheduler_snapshot(&self) -> SchedulerSnapshot {
        self.scheduler.snapshot().await
    }

    pub fn variants(&self) -> Vec<PipelineVariant> {
        self.registry.variants().cloned().collect()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn reporter(&self) -> &Arc<ProgressReporter> {
        &self.reporter
    }

    /// Subscribe to one job's events. `None` once the job has finished.
    pub async fn subscribe(&self, job_id: JobId) -> Option<JobSubscription> {
        self.reporter.subscribe(job_id).await
    }

    /// Wait until the job reaches a terminal state and return its record.
    pub async fn wait_for_terminal(&self, job_id: JobId) -> Result<JobRecord, CoreError> {
        if let Some(mut subscription) = self.reporter.subscribe(job_id).await {
            while subscription.recv().await.is_some() {}
        }
        self.store.get(job_id).await
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    async fn run_dispatcher(
        self: Arc<Self>,
        mut admissions: mpsc::UnboundedReceiver<JobId>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Job dispatcher started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                next = admissions.recv() => match next {
                    Some(job_id) => self.launch(job_id),
                    None => break,
                },
            }
        }
    }

    fn launch(self: &Arc<Self>, job_id: JobId) {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.drive(job_id).await });
    }

    /// Run one admitted job to completion and release its slot.
    async fn drive(&self, job_id: JobId) {
        let control = self
            .controls
            .read()
            .await
            .get(&job_id)
            .cloned()
            .unwrap_or_default();

        let timer = self.config.job_timeout.map(|limit| {
            let control = control.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                if control.cancel(FailureKind::TimedOut) {
                    tracing::warn!(
                        job_id = %job_id,
                        timeout_secs = limit.as_secs(),
                        "Job timed out",
                    );
                }
            })
        });

        match self.orchestrator.run(job_id, control).await {
            Ok(status) => {
                tracing::debug!(job_id = %job_id, status = status.label(), "Job finished");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Job bookkeeping failed");
                self.abandon(job_id, e.to_string()).await;
            }
        }

        if let Some(timer) = timer {
            timer.abort();
        }
        self.controls.write().await.remove(&job_id);
        self.scheduler.on_job_finished(job_id).await;
    }

    /// Force a job whose run errored into `Failed` so it does not stay
    /// active forever.
    async fn abandon(&self, job_id: JobId, cause: String) {
        let error = JobError {
            stage: None,
            cause,
            kind: FailureKind::StageFailure,
        };
        let failed = self
            .store
            .update(job_id, |r| {
                if r.is_terminal() {
                    Ok(false)
                } else {
                    r.fail(error.clone()).map(|_| true)
                }
            })
            .await;
        match failed {
            Ok(true) => {
                self.reporter
                    .publish(JobEvent::new(job_id, JobEventKind::Failed { error }))
                    .await;
            }
            Ok(false) => {}
            Err(_) => self.reporter.unregister(job_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::StageDefinition;
    use crate::workers::simulated::SimulatedStage;

    fn service(work_dir: &std::path::Path) -> Arc<JobService> {
        let mut registry = VariantRegistry::new();
        registry
            .register(
                "solo",
                vec![StageDefinition::new(
                    "only",
                    1.0,
                    Arc::new(SimulatedStage::new("only", 2, Duration::ZERO)),
                )],
            )
            .unwrap();
        let config = PipelineConfig {
            work_dir: work_dir.to_path_buf(),
            default_variant: "solo".into(),
            max_concurrent_jobs: 1,
            hardware_max_concurrent: 1,
            adapt_interval: Duration::ZERO,
            ..PipelineConfig::default()
        };
        JobService::start(config, registry, CancellationToken::new()).unwrap()
    }

    #[tokio::test]
    async fn cancel_before_scheduling_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let variant = service.registry.variant("solo").unwrap().clone();
        let job = service
            .store
            .create(
                &variant,
                JobRequest {
                    source: dir.path().join("in.mp4"),
                    options: StageOptions::default(),
                    priority: PRIORITY_NORMAL,
                    resource_class: ResourceClass::default(),
                },
            )
            .await
            .unwrap();

        // Record exists, scheduler and control map have not seen it yet.
        let record = service.cancel(job.id).await.unwrap();
        assert_eq!(record.status, JobStatus::Queued);
        assert!(service.controls.read().await[&job.id].is_cancelled());

        assert_eq!(service.schedule(&job).await.unwrap(), Admission::Started);
        let record = service.wait_for_terminal(job.id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        let error = record.error.unwrap();
        assert_eq!(error.kind, FailureKind::Cancelled);
        assert_eq!(error.stage, None);
        assert!(record.artifacts.is_empty());
    }
}
