//! Admission control: a concurrency limit, a priority queue of waiting jobs
//! and a background loop that adapts the limit to memory pressure.
//!
//! All state lives behind a single mutex, so admission decisions are
//! serialized and the running set can never exceed the limit in effect at
//! the time of admission. Admitted ids are sent over an unbounded channel to
//! whoever launches jobs; a job queued now is admitted later through that
//! channel, never by the caller that queued it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sysinfo::System;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use vid3d_core::error::CoreError;
use vid3d_core::scheduling::{
    adjust_concurrency, insertion_index, Admission, PressurePolicy, ResourceClass, SchedulerEntry,
};
use vid3d_core::types::JobId;

// ---------------------------------------------------------------------------
// Memory samplers
// ---------------------------------------------------------------------------

/// Source of the system's memory usage.
pub trait MemorySampler: Send + Sync {
    /// Share of physical memory in use (`0.0..=1.0`), or `None` when it
    /// cannot be measured.
    fn used_fraction(&self) -> Option<f64>;
}

/// [`MemorySampler`] backed by `sysinfo`.
pub struct SystemMemorySampler {
    system: std::sync::Mutex<System>,
}

impl SystemMemorySampler {
    pub fn new() -> Self {
        Self {
            system: std::sync::Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SystemMemorySampler {
    fn used_fraction(&self) -> Option<f64> {
        let mut system = self.system.lock().ok()?;
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return None;
        }
        let used = total.saturating_sub(system.available_memory());
        Some(used as f64 / total as f64)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A queued job as reported by [`ResourceScheduler::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    #[serde(flatten)]
    pub entry: SchedulerEntry,
    /// 1-based.
    pub position: usize,
    pub waiting_secs: i64,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSnapshot {
    pub max_concurrent: usize,
    pub hardware_max: usize,
    pub running: Vec<JobId>,
    pub queued: Vec<QueuedJob>,
    pub last_memory_fraction: Option<f64>,
}

// ---------------------------------------------------------------------------
// ResourceScheduler
// ---------------------------------------------------------------------------

struct SchedulerState {
    max_concurrent: usize,
    running: HashSet<JobId>,
    queue: Vec<SchedulerEntry>,
    last_memory_fraction: Option<f64>,
}

pub struct ResourceScheduler {
    state: Mutex<SchedulerState>,
    hardware_max: usize,
    policy: PressurePolicy,
    admissions: mpsc::UnboundedSender<JobId>,
}

impl ResourceScheduler {
    /// Create a scheduler and the receiver on which later admissions of
    /// queued jobs are delivered.
    pub fn new(
        max_concurrent: usize,
        hardware_max: usize,
        policy: PressurePolicy,
    ) -> (Self, mpsc::UnboundedReceiver<JobId>) {
        let hardware_max = hardware_max.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            state: Mutex::new(SchedulerState {
                max_concurrent: max_concurrent.clamp(1, hardware_max),
                running: HashSet::new(),
                queue: Vec::new(),
                last_memory_fraction: None,
            }),
            hardware_max,
            policy,
            admissions: tx,
        };
        (scheduler, rx)
    }

    /// Admit the job now if a slot is free, otherwise queue it.
    ///
    /// A job admitted here is NOT sent on the admission channel; the caller
    /// starts it. Submitting an id the scheduler already tracks is a
    /// conflict.
    pub async fn admit_or_queue(
        &self,
        job_id: JobId,
        priority: i32,
        resource_class: ResourceClass,
    ) -> Result<Admission, CoreError> {
        let mut state = self.state.lock().await;

        if state.running.contains(&job_id) || state.queue.iter().any(|e| e.job_id == job_id) {
            return Err(CoreError::Conflict(format!(
                "Job {job_id} is already scheduled"
            )));
        }

        if state.running.len() < state.max_concurrent {
            state.running.insert(job_id);
            tracing::debug!(
                job_id = %job_id,
                running = state.running.len(),
                max_concurrent = state.max_concurrent,
                "Job admitted",
            );
            return Ok(Admission::Started);
        }

        let index = insertion_index(&state.queue, priority);
        state.queue.insert(
            index,
            SchedulerEntry {
                job_id,
                priority,
                resource_class,
                enqueued_at: Utc::now(),
            },
        );
        tracing::info!(
            job_id = %job_id,
            priority,
            position = index + 1,
            queue_len = state.queue.len(),
            "Job queued",
        );
        Ok(Admission::Queued(index + 1))
    }

    /// Release the job's slot and admit from the queue head while slots are
    /// free. Returns the ids admitted, which are also sent on the channel.
    pub async fn on_job_finished(&self, job_id: JobId) -> Vec<JobId> {
        let mut state = self.state.lock().await;
        if !state.running.remove(&job_id) {
            tracing::debug!(job_id = %job_id, "Finished job was not running");
        }
        self.admit_from_queue(&mut state)
    }

    /// Remove a queued job. Returns `false` if it was not queued.
    pub async fn withdraw(&self, job_id: JobId) -> bool {
        let mut state = self.state.lock().await;
        match state.queue.iter().position(|e| e.job_id == job_id) {
            Some(index) => {
                state.queue.remove(index);
                tracing::info!(job_id = %job_id, "Job withdrawn from queue");
                true
            }
            None => false,
        }
    }

    /// 1-based position of a queued job.
    pub async fn queue_position(&self, job_id: JobId) -> Option<usize> {
        let state = self.state.lock().await;
        state
            .queue
            .iter()
            .position(|e| e.job_id == job_id)
            .map(|i| i + 1)
    }

    pub async fn running_count(&self) -> usize {
        self.state.lock().await.running.len()
    }

    pub async fn max_concurrent(&self) -> usize {
        self.state.lock().await.max_concurrent
    }

    pub fn hardware_max(&self) -> usize {
        self.hardware_max
    }

    pub async fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.state.lock().await;
        let now = Utc::now();
        SchedulerSnapshot {
            max_concurrent: state.max_concurrent,
            hardware_max: self.hardware_max,
            running: state.running.iter().copied().collect(),
            queued: state
                .queue
                .iter()
                .enumerate()
                .map(|(i, entry)| QueuedJob {
                    entry: entry.clone(),
                    position: i + 1,
                    waiting_secs: (now - entry.enqueued_at).num_seconds().max(0),
                })
                .collect(),
            last_memory_fraction: state.last_memory_fraction,
        }
    }

    /// Apply one memory sample to the concurrency limit.
    ///
    /// Shrinking never preempts running jobs; it only delays admissions
    /// until the running count drops below the new limit. Growing admits
    /// queued jobs immediately. Returns the limit now in effect.
    pub async fn adapt(&self, used_fraction: f64) -> usize {
        let mut state = self.state.lock().await;
        state.last_memory_fraction = Some(used_fraction);

        let has_demand = !state.queue.is_empty() || state.running.len() >= state.max_concurrent;
        let previous = state.max_concurrent;
        let next = adjust_concurrency(
            previous,
            self.hardware_max,
            used_fraction,
            has_demand,
            &self.policy,
        );

        if next != previous {
            tracing::info!(
                previous,
                next,
                memory_used = used_fraction,
                "Concurrency limit adjusted",
            );
            state.max_concurrent = next;
        }
        if next > previous {
            self.admit_from_queue(&mut state);
        }
        next
    }

    /// Sample `sampler` every `interval` and adapt until `cancel` fires.
    pub async fn run_adaptation(
        self: Arc<Self>,
        sampler: Arc<dyn MemorySampler>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            high_water = self.policy.high_water,
            low_water = self.policy.low_water,
            "Scheduler adaptation started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler adaptation shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match sampler.used_fraction() {
                        Some(fraction) => {
                            self.adapt(fraction).await;
                        }
                        None => tracing::warn!("Memory usage unavailable, limit unchanged"),
                    }
                }
            }
        }
    }

    fn admit_from_queue(&self, state: &mut SchedulerState) -> Vec<JobId> {
        let mut admitted = Vec::new();
        while state.running.len() < state.max_concurrent && !state.queue.is_empty() {
            let entry = state.queue.remove(0);
            state.running.insert(entry.job_id);
            tracing::info!(
                job_id = %entry.job_id,
                priority = entry.priority,
                "Queued job admitted",
            );
            if self.admissions.send(entry.job_id).is_err() {
                tracing::warn!(job_id = %entry.job_id, "Admission receiver dropped");
            }
            admitted.push(entry.job_id);
        }
        admitted
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
