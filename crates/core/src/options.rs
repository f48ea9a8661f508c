//! Per-job processing options passed through to every stage.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

/// Upper bound on frames a caller may request to be extracted.
pub const MAX_FRAMES_LIMIT: u32 = 10_000;

/// Coarse quality knob. Stages translate it into their own tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        }
    }

    /// Frames extracted when the caller did not set `max_frames`.
    pub fn default_frame_count(&self) -> u32 {
        match self {
            Quality::Low => 30,
            Quality::Medium => 60,
            Quality::High => 120,
        }
    }

    /// Points written per extracted frame by the reconstruction stages.
    pub fn points_per_frame(&self) -> u32 {
        match self {
            Quality::Low => 200,
            Quality::Medium => 500,
            Quality::High => 1_000,
        }
    }
}

impl FromStr for Quality {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            other => Err(CoreError::Validation(format!(
                "Unknown quality '{other}', expected low, medium or high"
            ))),
        }
    }
}

/// Options record handed to every stage of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StageOptions {
    #[serde(default)]
    pub quality: Quality,

    #[validate(range(min = 1, max = 10000))]
    pub max_frames: Option<u32>,

    /// Mode-specific tuning knobs, passed through untouched.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StageOptions {
    /// Number of frames the extraction stage should target.
    pub fn frame_budget(&self) -> u32 {
        self.max_frames
            .unwrap_or_else(|| self.quality.default_frame_count())
            .min(MAX_FRAMES_LIMIT)
    }

    /// Run the derive validators and map failures into [`CoreError`].
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))
    }
}
