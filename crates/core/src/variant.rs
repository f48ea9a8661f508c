//! Pipeline variants: named, ordered stage lists with progress weights.
//!
//! A variant is selected at submission time and fixes which stages run for
//! a job and how much of the overall progress each stage represents.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Allowed deviation of a variant's weight sum from 1.0.
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Frame extraction from the uploaded video.
pub const STAGE_EXTRACTING: &str = "extracting";

/// Camera pose / intrinsics estimation across extracted frames.
pub const STAGE_CALIBRATING: &str = "calibrating";

/// Per-frame depth estimation.
pub const STAGE_ESTIMATING: &str = "estimating";

/// Point cloud / mesh reconstruction.
pub const STAGE_RECONSTRUCTING: &str = "reconstructing";

/// Final asset rendering / enhancement for the viewer.
pub const STAGE_RENDERING: &str = "rendering";

/// Three-stage variant: extract, estimate depth, render a point cloud.
pub const VARIANT_STANDARD: &str = "standard";

/// Five-stage variant adding calibration and a dedicated reconstruction pass.
pub const VARIANT_FUSION: &str = "fusion";

/// Maximum length of a variant or stage name.
const MAX_NAME_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Name and progress weight of one stage within a variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub weight: f64,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// A named, ordered list of stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineVariant {
    pub name: String,
    pub stages: Vec<StageSpec>,
}

impl PipelineVariant {
    pub fn new(name: impl Into<String>, stages: Vec<StageSpec>) -> Self {
        Self {
            name: name.into(),
            stages,
        }
    }

    /// The built-in `standard` variant.
    pub fn standard() -> Self {
        Self::new(
            VARIANT_STANDARD,
            vec![
                StageSpec::new(STAGE_EXTRACTING, 0.3),
                StageSpec::new(STAGE_ESTIMATING, 0.4),
                StageSpec::new(STAGE_RENDERING, 0.3),
            ],
        )
    }

    /// The built-in `fusion` variant.
    pub fn fusion() -> Self {
        Self::new(
            VARIANT_FUSION,
            vec![
                StageSpec::new(STAGE_EXTRACTING, 0.15),
                StageSpec::new(STAGE_CALIBRATING, 0.15),
                StageSpec::new(STAGE_ESTIMATING, 0.25),
                StageSpec::new(STAGE_RECONSTRUCTING, 0.30),
                StageSpec::new(STAGE_RENDERING, 0.15),
            ],
        )
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn weights(&self) -> Vec<f64> {
        self.stages.iter().map(|s| s.weight).collect()
    }

    /// Name of the stage at `index`, if any.
    pub fn stage_name(&self, index: usize) -> Option<&str> {
        self.stages.get(index).map(|s| s.name.as_str())
    }

    /// Check the structural invariants of this variant.
    ///
    /// Rules:
    /// - Name must be non-empty and at most `MAX_NAME_LEN` characters.
    /// - At least one stage.
    /// - Every weight finite and in `0.0..=1.0`.
    /// - Stage names non-empty and unique (artifacts are keyed by name).
    /// - Weights sum to 1.0 within [`WEIGHT_EPSILON`].
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LEN {
            return Err(CoreError::Validation(format!(
                "Variant name must be 1..={MAX_NAME_LEN} characters"
            )));
        }
        if self.stages.is_empty() {
            return Err(CoreError::Validation(format!(
                "Invalid variant '{}': no stages",
                self.name
            )));
        }

        let mut seen = std::collections::HashSet::with_capacity(self.stages.len());
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.name.is_empty() || stage.name.len() > MAX_NAME_LEN {
                return Err(CoreError::Validation(format!(
                    "Invalid variant '{}': stage {i} name must be 1..={MAX_NAME_LEN} characters",
                    self.name
                )));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Invalid variant '{}': duplicate stage \"{}\"",
                    self.name, stage.name
                )));
            }
            if !stage.weight.is_finite() || !(0.0..=1.0).contains(&stage.weight) {
                return Err(CoreError::Validation(format!(
                    "Invalid variant '{}': stage \"{}\" has weight {} outside [0, 1]",
                    self.name, stage.name, stage.weight
                )));
            }
        }

        let sum: f64 = self.stages.iter().map(|s| s.weight).sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(CoreError::Validation(format!(
                "Invalid variant '{}': weights sum to {sum}, expected 1.0",
                self.name
            )));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_variants_are_valid() {
        assert!(PipelineVariant::standard().validate().is_ok());
        assert!(PipelineVariant::fusion().validate().is_ok());
    }

    #[test]
    fn standard_has_three_stages_fusion_five() {
        assert_eq!(PipelineVariant::standard().stage_count(), 3);
        assert_eq!(PipelineVariant::fusion().stage_count(), 5);
    }

    #[test]
    fn empty_variant_rejected() {
        let v = PipelineVariant::new("empty", vec![]);
        assert!(v.validate().is_err());
    }

    #[test]
    fn weights_not_summing_to_one_rejected() {
        let v = PipelineVariant::new(
            "short",
            vec![StageSpec::new("a", 0.5), StageSpec::new("b", 0.4)],
        );
        let err = v.validate().unwrap_err().to_string();
        assert!(err.contains("weights sum"), "got: {err}");
    }

    #[test]
    fn weight_sum_within_epsilon_accepted() {
        let v = PipelineVariant::new(
            "thirds",
            vec![
                StageSpec::new("a", 1.0 / 3.0),
                StageSpec::new("b", 1.0 / 3.0),
                StageSpec::new("c", 1.0 / 3.0),
            ],
        );
        assert!(v.validate().is_ok());
    }

    #[test]
    fn negative_weight_rejected() {
        let v = PipelineVariant::new(
            "neg",
            vec![StageSpec::new("a", 1.2), StageSpec::new("b", -0.2)],
        );
        assert!(v.validate().is_err());
    }

    #[test]
    fn nan_weight_rejected() {
        let v = PipelineVariant::new("nan", vec![StageSpec::new("a", f64::NAN)]);
        assert!(v.validate().is_err());
    }

    #[test]
    fn duplicate_stage_names_rejected() {
        let v = PipelineVariant::new(
            "dup",
            vec![StageSpec::new("a", 0.5), StageSpec::new("a", 0.5)],
        );
        assert!(v.validate().is_err());
    }

    #[test]
    fn stage_name_lookup() {
        let v = PipelineVariant::standard();
        assert_eq!(v.stage_name(0), Some(STAGE_EXTRACTING));
        assert_eq!(v.stage_name(2), Some(STAGE_RENDERING));
        assert_eq!(v.stage_name(3), None);
    }
}
