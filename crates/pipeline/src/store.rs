//! In-memory job registry.
//!
//! Records are kept in insertion order and mutated only through
//! [`JobStore::update`], which runs under the store's write lock, so each
//! job has a single writer at a time and readers always see a consistent
//! snapshot.

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::RwLock;
use vid3d_core::error::CoreError;
use vid3d_core::job::{JobRecord, JobRequest, JobStatus};
use vid3d_core::types::JobId;
use vid3d_core::variant::PipelineVariant;

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<IndexMap<JobId, JobRecord>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `Queued` record with a fresh id.
    ///
    /// Fails with a validation error if the variant has no stages or its
    /// weights do not sum to 1.0.
    pub async fn create(
        &self,
        variant: &PipelineVariant,
        request: JobRequest,
    ) -> Result<JobRecord, CoreError> {
        variant.validate()?;
        let record = JobRecord::new(JobId::new(), variant.clone(), request);
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&record.id) {
            return Err(CoreError::Conflict(format!("Job {} already exists", record.id)));
        }
        jobs.insert(record.id, record.clone());
        Ok(record)
    }

    /// Snapshot of one record.
    pub async fn get(&self, id: JobId) -> Result<JobRecord, CoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::job_not_found(id))
    }

    /// Snapshots of every record, oldest first.
    pub async fn list_all(&self) -> Vec<JobRecord> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Apply `f` to the record under the write lock.
    ///
    /// `JobRecord`'s mutators validate before they change anything, so a
    /// rejected transition leaves the record untouched.
    pub async fn update<T, F>(&self, id: JobId, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut JobRecord) -> Result<T, CoreError>,
    {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(&id)
            .ok_or_else(|| CoreError::job_not_found(id))?;
        f(record)
    }

    /// Remove a finished record. Active jobs cannot be removed.
    pub async fn remove(&self, id: JobId) -> Result<JobRecord, CoreError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get(&id).ok_or_else(|| CoreError::job_not_found(id))?;
        if !record.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Job {id} is still {} and cannot be removed",
                record.status.label()
            )));
        }
        jobs.shift_remove(&id)
            .ok_or_else(|| CoreError::job_not_found(id))
    }

    /// Drop a record regardless of status. Used to roll back a submission
    /// that could not be scheduled.
    pub(crate) async fn discard(&self, id: JobId) {
        self.jobs.write().await.shift_remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn count_by_status(&self) -> StatusCounts {
        let jobs = self.jobs.read().await;
        let mut counts = StatusCounts::default();
        for record in jobs.values() {
            match record.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running { .. } => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use vid3d_core::job::{ArtifactRef, JobError};
    use vid3d_core::options::StageOptions;
    use vid3d_core::scheduling::{ResourceClass, PRIORITY_NORMAL};

    fn request() -> JobRequest {
        JobRequest {
            source: "/tmp/in.mp4".into(),
            options: StageOptions::default(),
            priority: PRIORITY_NORMAL,
            resource_class: ResourceClass::Cpu,
        }
    }

    #[tokio::test]
    async fn create_then_get_returns_queued_record() {
        let store = JobStore::new();
        let created = store
            .create(&PipelineVariant::standard(), request())
            .await
            .unwrap();

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Queued);
        assert_eq!(fetched.variant.name, "standard");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn invalid_variant_creates_nothing() {
        use vid3d_core::variant::StageSpec;

        let store = JobStore::new();
        let lopsided = PipelineVariant::new(
            "lopsided",
            vec![StageSpec::new("a", 0.5), StageSpec::new("b", 0.4)],
        );
        let empty = PipelineVariant::new("empty", vec![]);

        assert_matches!(store.create(&lopsided, request()).await, Err(CoreError::Validation(_)));
        assert_matches!(store.create(&empty, request()).await, Err(CoreError::Validation(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let store = JobStore::new();
        assert_matches!(
            store.get(JobId::new()).await,
            Err(CoreError::NotFound { entity: "Job", .. })
        );
    }

    #[tokio::test]
    async fn list_preserves_creation_order() {
        let store = JobStore::new();
        let a = store.create(&PipelineVariant::standard(), request()).await.unwrap();
        let b = store.create(&PipelineVariant::fusion(), request()).await.unwrap();

        let ids: Vec<JobId> = store.list_all().await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn rejected_update_leaves_record_unchanged() {
        let store = JobStore::new();
        let job = store.create(&PipelineVariant::standard(), request()).await.unwrap();

        // Skipping stage 0 is not a legal transition.
        let result = store.update(job.id, |r| r.start_stage(1)).await;
        assert_matches!(result, Err(CoreError::Conflict(_)));
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn remove_requires_terminal_status() {
        let store = JobStore::new();
        let job = store.create(&PipelineVariant::standard(), request()).await.unwrap();

        assert_matches!(store.remove(job.id).await, Err(CoreError::Conflict(_)));

        store
            .update(job.id, |r| r.fail(JobError::stage_failure("extracting", "boom")))
            .await
            .unwrap();
        let removed = store.remove(job.id).await.unwrap();
        assert_eq!(removed.id, job.id);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn counts_by_status() {
        let store = JobStore::new();
        let _queued = store.create(&PipelineVariant::standard(), request()).await.unwrap();
        let running = store.create(&PipelineVariant::standard(), request()).await.unwrap();
        let done = store.create(&PipelineVariant::standard(), request()).await.unwrap();

        store.update(running.id, |r| r.start_stage(0)).await.unwrap();
        store
            .update(done.id, |r| {
                r.start_stage(0)?;
                r.record_artifact("extracting", ArtifactRef::Inline("x".into()))?;
                r.complete()
            })
            .await
            .unwrap();

        let counts = store.count_by_status().await;
        assert_eq!(
            counts,
            StatusCounts {
                queued: 1,
                running: 1,
                completed: 1,
                failed: 0,
            }
        );
    }
}
