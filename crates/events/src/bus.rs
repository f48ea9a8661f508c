//! In-process progress hub backed by `tokio::sync::broadcast` channels.
//!
//! [`ProgressReporter`] keeps one channel per registered job. Listeners
//! subscribe to a job id and receive that job's events in publish order; the
//! channel is dropped right after the job's terminal event, so subscribers
//! see the stream end instead of a dangling callback entry. A second,
//! process-wide feed carries every event for fan-out consumers such as the
//! WebSocket broadcaster.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use vid3d_core::job::{ArtifactRef, JobError};
use vid3d_core::job_events::{
    MSG_TYPE_JOB_COMPLETED, MSG_TYPE_JOB_FAILED, MSG_TYPE_JOB_PROGRESS, MSG_TYPE_JOB_QUEUED,
    MSG_TYPE_JOB_STARTED, MSG_TYPE_STAGE_COMPLETED, MSG_TYPE_STAGE_STARTED,
};
use vid3d_core::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEventKind {
    #[serde(rename = "job_queued")]
    Queued { position: usize },

    #[serde(rename = "job_started")]
    Started,

    #[serde(rename = "stage_started", rename_all = "camelCase")]
    StageStarted { stage: String, stage_index: usize },

    #[serde(rename = "job_progress", rename_all = "camelCase")]
    Progress {
        stage: String,
        stage_index: usize,
        /// Fraction local to `stage`, clamped to `[0, 1]`.
        fraction: f64,
        /// Overall job progress, clamped to `[0, 1]`.
        overall: f64,
        current_frame: Option<u32>,
        total_frames: Option<u32>,
    },

    #[serde(rename = "stage_completed")]
    StageCompleted { stage: String, artifact: ArtifactRef },

    #[serde(rename = "job_completed")]
    Completed,

    #[serde(rename = "job_failed")]
    Failed { error: JobError },
}

impl JobEventKind {
    /// Wire message type, matching the `MSG_TYPE_*` constants.
    pub fn message_type(&self) -> &'static str {
        match self {
            JobEventKind::Queued { .. } => MSG_TYPE_JOB_QUEUED,
            JobEventKind::Started => MSG_TYPE_JOB_STARTED,
            JobEventKind::StageStarted { .. } => MSG_TYPE_STAGE_STARTED,
            JobEventKind::Progress { .. } => MSG_TYPE_JOB_PROGRESS,
            JobEventKind::StageCompleted { .. } => MSG_TYPE_STAGE_COMPLETED,
            JobEventKind::Completed => MSG_TYPE_JOB_COMPLETED,
            JobEventKind::Failed { .. } => MSG_TYPE_JOB_FAILED,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEventKind::Completed | JobEventKind::Failed { .. })
    }
}

/// Event envelope published through the reporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: JobId,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub timestamp: Timestamp,
}

impl JobEvent {
    pub fn new(job_id: JobId, kind: JobEventKind) -> Self {
        Self {
            job_id,
            kind,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// JobSubscription
// ---------------------------------------------------------------------------

/// Receiver for a single job's events.
///
/// Ends (returns `None`) once the job's terminal event has been delivered.
pub struct JobSubscription {
    job_id: JobId,
    rx: broadcast::Receiver<JobEvent>,
}

impl JobSubscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the next event.
    ///
    /// A subscriber that falls behind skips the dropped events and keeps
    /// going; progress values it does receive are still in order.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(job_id = %self.job_id, skipped, "Progress subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressReporter
// ---------------------------------------------------------------------------

/// Default buffer capacity for a single job's channel.
const DEFAULT_JOB_CAPACITY: usize = 128;

/// Default buffer capacity for the process-wide feed.
const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Publish/subscribe hub for job events.
///
/// Designed to be shared via `Arc<ProgressReporter>`.
pub struct ProgressReporter {
    jobs: RwLock<HashMap<JobId, broadcast::Sender<JobEvent>>>,
    feed: broadcast::Sender<JobEvent>,
    job_capacity: usize,
}

impl ProgressReporter {
    pub fn new(job_capacity: usize, feed_capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(feed_capacity.max(1));
        Self {
            jobs: RwLock::new(HashMap::new()),
            feed,
            job_capacity: job_capacity.max(1),
        }
    }

    /// Open the per-job channel. Idempotent.
    pub async fn register(&self, job_id: JobId) {
        let mut jobs = self.jobs.write().await;
        jobs.entry(job_id)
            .or_insert_with(|| broadcast::channel(self.job_capacity).0);
    }

    /// Drop the per-job channel without a terminal event.
    pub async fn unregister(&self, job_id: JobId) {
        self.jobs.write().await.remove(&job_id);
    }

    /// Subscribe to one job. `None` if the job is unknown or already finished.
    pub async fn subscribe(&self, job_id: JobId) -> Option<JobSubscription> {
        let jobs = self.jobs.read().await;
        jobs.get(&job_id).map(|tx| JobSubscription {
            job_id,
            rx: tx.subscribe(),
        })
    }

    /// Subscribe to every event of every job.
    pub fn subscribe_all(&self) -> broadcast::Receiver<JobEvent> {
        self.feed.subscribe()
    }

    /// Publish an event to the job's subscribers and the process-wide feed.
    ///
    /// A terminal event closes the job's channel after delivery.
    pub async fn publish(&self, event: JobEvent) {
        let terminal = event.kind.is_terminal();
        let job_id = event.job_id;

        if terminal {
            if let Some(tx) = self.jobs.write().await.remove(&job_id) {
                // Ignore the SendError -- it only means there are zero receivers.
                let _ = tx.send(event.clone());
            }
        } else if let Some(tx) = self.jobs.read().await.get(&job_id) {
            let _ = tx.send(event.clone());
        }

        tracing::trace!(job_id = %job_id, kind = event.kind.message_type(), "Job event published");
        let _ = self.feed.send(event);
    }

    /// Number of jobs with an open channel.
    pub async fn active_channels(&self) -> usize {
        self.jobs.read().await.len()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(DEFAULT_JOB_CAPACITY, DEFAULT_FEED_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use vid3d_core::job::FailureKind;

    fn progress(overall: f64) -> JobEventKind {
        JobEventKind::Progress {
            stage: "extracting".into(),
            stage_index: 0,
            fraction: overall,
            overall,
            current_frame: None,
            total_frames: None,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_job_events_in_order() {
        let reporter = ProgressReporter::default();
        let id = JobId::new();
        reporter.register(id).await;
        let mut sub = reporter.subscribe(id).await.expect("registered job");

        reporter.publish(JobEvent::new(id, progress(0.1))).await;
        reporter.publish(JobEvent::new(id, progress(0.2))).await;

        assert_eq!(sub.recv().await.unwrap().kind, progress(0.1));
        assert_eq!(sub.recv().await.unwrap().kind, progress(0.2));
    }

    #[tokio::test]
    async fn terminal_event_closes_the_job_channel() {
        let reporter = ProgressReporter::default();
        let id = JobId::new();
        reporter.register(id).await;
        let mut sub = reporter.subscribe(id).await.unwrap();

        reporter
            .publish(JobEvent::new(id, JobEventKind::Completed))
            .await;

        assert_eq!(sub.recv().await.unwrap().kind, JobEventKind::Completed);
        assert!(sub.recv().await.is_none());
        assert_eq!(reporter.active_channels().await, 0);
        assert!(reporter.subscribe(id).await.is_none());
    }

    #[tokio::test]
    async fn unknown_job_has_no_subscription() {
        let reporter = ProgressReporter::default();
        assert!(reporter.subscribe(JobId::new()).await.is_none());
    }

    #[tokio::test]
    async fn events_for_other_jobs_are_not_delivered() {
        let reporter = ProgressReporter::default();
        let a = JobId::new();
        let b = JobId::new();
        reporter.register(a).await;
        reporter.register(b).await;
        let mut sub_a = reporter.subscribe(a).await.unwrap();

        reporter.publish(JobEvent::new(b, progress(0.5))).await;
        reporter.publish(JobEvent::new(a, progress(0.25))).await;

        let got = sub_a.recv().await.unwrap();
        assert_eq!(got.job_id, a);
        assert_eq!(got.kind, progress(0.25));
    }

    #[tokio::test]
    async fn feed_receives_every_job() {
        let reporter = ProgressReporter::default();
        let mut feed = reporter.subscribe_all();
        let a = JobId::new();
        let b = JobId::new();

        reporter
            .publish(JobEvent::new(a, JobEventKind::Queued { position: 1 }))
            .await;
        reporter.publish(JobEvent::new(b, JobEventKind::Started)).await;

        assert_eq!(feed.recv().await.unwrap().job_id, a);
        assert_eq!(feed.recv().await.unwrap().job_id, b);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let reporter = ProgressReporter::default();
        // No subscribers and no registration -- this must not panic.
        reporter
            .publish(JobEvent::new(JobId::new(), JobEventKind::Started))
            .await;
    }

    #[test]
    fn serialized_type_matches_message_constant() {
        let kinds = vec![
            JobEventKind::Queued { position: 2 },
            JobEventKind::Started,
            JobEventKind::StageStarted {
                stage: "rendering".into(),
                stage_index: 2,
            },
            progress(0.3),
            JobEventKind::StageCompleted {
                stage: "rendering".into(),
                artifact: ArtifactRef::Inline("ok".into()),
            },
            JobEventKind::Completed,
            JobEventKind::Failed {
                error: JobError::interrupted(FailureKind::TimedOut, None),
            },
        ];
        for kind in kinds {
            let event = JobEvent::new(JobId::new(), kind.clone());
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], kind.message_type());
            assert!(json["jobId"].is_string());
        }
    }
}
