//! Named pipeline variants bound to the workers that run their stages.

use std::sync::Arc;

use indexmap::IndexMap;
use vid3d_core::error::CoreError;
use vid3d_core::variant::{
    PipelineVariant, StageSpec, STAGE_CALIBRATING, STAGE_ESTIMATING, STAGE_EXTRACTING,
    STAGE_RECONSTRUCTING, STAGE_RENDERING, VARIANT_FUSION, VARIANT_STANDARD,
};

use crate::config::PipelineConfig;
use crate::stage::StageWorker;
use crate::workers::{FrameExtractor, PointCloudBuilder, SimulatedStage};

/// Steps taken by each simulated stage.
const SIMULATED_STEPS: u32 = 10;

/// A stage spec and the worker that executes it.
#[derive(Clone)]
pub struct StageDefinition {
    pub spec: StageSpec,
    pub worker: Arc<dyn StageWorker>,
}

impl StageDefinition {
    pub fn new(name: impl Into<String>, weight: f64, worker: Arc<dyn StageWorker>) -> Self {
        Self {
            spec: StageSpec::new(name, weight),
            worker,
        }
    }
}

impl std::fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDefinition")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

struct RegisteredVariant {
    variant: PipelineVariant,
    stages: Vec<StageDefinition>,
}

/// Immutable after construction; share it as `Arc<VariantRegistry>`.
#[derive(Default)]
pub struct VariantRegistry {
    variants: IndexMap<String, RegisteredVariant>,
}

impl VariantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `standard` and `fusion` variants wired to the built-in workers.
    pub fn builtin(config: &PipelineConfig) -> Result<Self, CoreError> {
        let step = config.simulated_step;
        let extractor: Arc<dyn StageWorker> =
            Arc::new(FrameExtractor::new(config.ffmpeg_path.clone(), step));

        let mut registry = Self::new();
        registry.register(
            VARIANT_STANDARD,
            vec![
                StageDefinition::new(STAGE_EXTRACTING, 0.3, Arc::clone(&extractor)),
                StageDefinition::new(
                    STAGE_ESTIMATING,
                    0.4,
                    Arc::new(SimulatedStage::new("depth maps", SIMULATED_STEPS, step)),
                ),
                StageDefinition::new(
                    STAGE_RENDERING,
                    0.3,
                    Arc::new(PointCloudBuilder::new("model", 1.0, step)),
                ),
            ],
        )?;
        registry.register(
            VARIANT_FUSION,
            vec![
                StageDefinition::new(STAGE_EXTRACTING, 0.15, extractor),
                StageDefinition::new(
                    STAGE_CALIBRATING,
                    0.15,
                    Arc::new(SimulatedStage::new("camera poses", SIMULATED_STEPS, step)),
                ),
                StageDefinition::new(
                    STAGE_ESTIMATING,
                    0.25,
                    Arc::new(SimulatedStage::new("depth maps", SIMULATED_STEPS, step)),
                ),
                StageDefinition::new(
                    STAGE_RECONSTRUCTING,
                    0.30,
                    Arc::new(PointCloudBuilder::new("fused", 1.0, step)),
                ),
                StageDefinition::new(
                    STAGE_RENDERING,
                    0.15,
                    Arc::new(PointCloudBuilder::new("model", 2.0, step)),
                ),
            ],
        )?;
        Ok(registry)
    }

    /// Register a variant. Its stage list is validated as a
    /// [`PipelineVariant`]; names must be unique.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        stages: Vec<StageDefinition>,
    ) -> Result<(), CoreError> {
        let name = name.into();
        if self.variants.contains_key(&name) {
            return Err(CoreError::Conflict(format!(
                "Variant '{name}' is already registered"
            )));
        }
        let variant = PipelineVariant::new(
            name.clone(),
            stages.iter().map(|s| s.spec.clone()).collect(),
        );
        variant.validate()?;
        self.variants
            .insert(name, RegisteredVariant { variant, stages });
        Ok(())
    }

    pub fn variant(&self, name: &str) -> Option<&PipelineVariant> {
        self.variants.get(name).map(|r| &r.variant)
    }

    pub fn stages(&self, name: &str) -> Option<&[StageDefinition]> {
        self.variants.get(name).map(|r| r.stages.as_slice())
    }

    pub fn variants(&self) -> impl Iterator<Item = &PipelineVariant> {
        self.variants.values().map(|r| &r.variant)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variants.contains_key(name)
    }
}
