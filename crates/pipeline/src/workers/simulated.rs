use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use vid3d_core::job::ArtifactRef;

use super::write_manifest;
use crate::error::StageError;
use crate::stage::{StageContext, StageInput, StageWorker};

/// A stage that advances in fixed steps and writes a JSON manifest
/// describing what it would have produced.
#[derive(Debug, Clone)]
pub struct SimulatedStage {
    label: String,
    steps: u32,
    step_delay: Duration,
}

impl SimulatedStage {
    pub fn new(label: impl Into<String>, steps: u32, step_delay: Duration) -> Self {
        Self {
            label: label.into(),
            steps: steps.max(1),
            step_delay,
        }
    }
}

#[async_trait]
impl StageWorker for SimulatedStage {
    async fn execute(&self, input: StageInput, ctx: StageContext) -> Result<ArtifactRef, StageError> {
        ctx.emit(0.0);
        for step in 1..=self.steps {
            ctx.checkpoint()?;
            tokio::time::sleep(self.step_delay).await;
            ctx.emit(f64::from(step) / f64::from(self.steps));
        }
        ctx.checkpoint()?;

        let manifest = json!({
            "jobId": ctx.job_id(),
            "stage": ctx.stage(),
            "output": self.label,
            "quality": ctx.options().quality,
            "input": input.previous,
            "steps": self.steps,
            "generatedAt": Utc::now(),
        });
        let path = ctx.work_dir().join(format!("{}.json", ctx.stage()));
        write_manifest(&path, &manifest).await
    }
}
