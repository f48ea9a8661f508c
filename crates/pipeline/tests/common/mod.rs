//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use vid3d_core::job::ArtifactRef;
use vid3d_core::types::JobId;
use vid3d_events::{JobEvent, JobEventKind, JobSubscription};
use vid3d_pipeline::{
    PipelineConfig, StageContext, StageDefinition, StageError, StageInput, StageWorker,
    VariantRegistry,
};

// ---------------------------------------------------------------------------
// Scripted stage
// ---------------------------------------------------------------------------

/// How a [`ScriptedStage`] ends.
#[derive(Debug, Clone)]
pub enum Outcome {
    Succeed,
    Fail(String),
    Panic,
}

/// Emits a fixed list of fractions, then ends as scripted. Records every
/// input it receives.
pub struct ScriptedStage {
    pub label: String,
    pub emits: Vec<f64>,
    pub outcome: Outcome,
    pub inputs: Mutex<Vec<Option<ArtifactRef>>>,
    pub calls: AtomicUsize,
}

impl ScriptedStage {
    pub fn new(label: &str, emits: &[f64], outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            emits: emits.to_vec(),
            outcome,
            inputs: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn succeed(label: &str, emits: &[f64]) -> Arc<Self> {
        Self::new(label, emits, Outcome::Succeed)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<Option<ArtifactRef>> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageWorker for ScriptedStage {
    async fn execute(&self, input: StageInput, ctx: StageContext) -> Result<ArtifactRef, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input.previous);
        for fraction in &self.emits {
            ctx.emit(*fraction);
        }
        match &self.outcome {
            Outcome::Succeed => Ok(ArtifactRef::Inline(self.label.clone())),
            Outcome::Fail(cause) => Err(StageError::failed(cause.clone())),
            Outcome::Panic => panic!("scripted panic in {}", self.label),
        }
    }
}

// ---------------------------------------------------------------------------
// Gated stage
// ---------------------------------------------------------------------------

/// Blocks until a permit is released or the job is cancelled. Tracks how
/// many executions overlap and the order jobs entered.
pub struct GatedStage {
    gate: Semaphore,
    active: AtomicUsize,
    peak: AtomicUsize,
    entered: Mutex<Vec<JobId>>,
    /// Return the artifact even when cancelled, instead of `Cancelled`.
    ignore_cancel: bool,
}

impl GatedStage {
    fn build(ignore_cancel: bool) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            entered: Mutex::new(Vec::new()),
            ignore_cancel,
        })
    }

    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    /// A gated stage that finishes normally even after cancellation.
    pub fn stubborn() -> Arc<Self> {
        Self::build(true)
    }

    /// A gate that never blocks.
    pub fn open() -> Arc<Self> {
        let stage = Self::new();
        stage.gate.add_permits(Semaphore::MAX_PERMITS / 2);
        stage
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn entered(&self) -> Vec<JobId> {
        self.entered.lock().unwrap().clone()
    }

    /// Wait until `n` executions have entered the stage.
    pub async fn wait_entered(&self, n: usize) {
        for _ in 0..500 {
            if self.entered.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("fewer than {n} executions entered the gated stage");
    }
}

#[async_trait]
impl StageWorker for GatedStage {
    async fn execute(&self, _input: StageInput, ctx: StageContext) -> Result<ArtifactRef, StageError> {
        self.entered.lock().unwrap().push(ctx.job_id());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ctx.emit(0.5);

        let result = if self.ignore_cancel {
            let _ = self.gate.acquire().await.map(|p| p.forget());
            Ok(ArtifactRef::Inline("late".into()))
        } else {
            tokio::select! {
                permit = self.gate.acquire() => {
                    let _ = permit.map(|p| p.forget());
                    Ok(ArtifactRef::Inline("gated".into()))
                }
                _ = ctx.cancelled() => Err(StageError::Cancelled),
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn single_stage_registry(name: &str, worker: Arc<dyn StageWorker>) -> VariantRegistry {
    let mut registry = VariantRegistry::new();
    registry
        .register(name, vec![StageDefinition::new("only", 1.0, worker)])
        .unwrap();
    registry
}

/// Config for tests: no adaptation, no artificial delays.
pub fn test_config(work_dir: &Path, default_variant: &str, max_concurrent: usize) -> PipelineConfig {
    PipelineConfig {
        work_dir: work_dir.to_path_buf(),
        default_variant: default_variant.to_string(),
        max_concurrent_jobs: max_concurrent,
        hardware_max_concurrent: max_concurrent.max(1),
        adapt_interval: Duration::ZERO,
        simulated_step: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

pub fn source_file(dir: &Path) -> PathBuf {
    let path = dir.join("input.mp4");
    std::fs::write(&path, b"fake video bytes").unwrap();
    path
}

/// Collect every event until the subscription closes.
pub async fn collect(mut subscription: JobSubscription) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(10), subscription.recv())
        .await
        .expect("job did not finish in time")
    {
        events.push(event);
    }
    events
}

pub fn overall_values(events: &[JobEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            JobEventKind::Progress { overall, .. } => Some(*overall),
            _ => None,
        })
        .collect()
}

pub fn approx_eq(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
}
