//! Progress arithmetic: mapping a stage's local fraction into the job's
//! overall progress range.
//!
//! Stage `i` owns the slice `[sum(w[..i]), sum(w[..=i])]` of the overall
//! range. Every value produced here is clamped to `[0, 1]`.

use crate::variant::WEIGHT_EPSILON;

/// Clamp a stage-reported fraction into `[0, 1]`.
///
/// Out-of-range values are clamped rather than rejected; NaN maps to 0.
pub fn clamp_fraction(fraction: f64) -> f64 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

/// Overall progress at the start of stage `index`.
pub fn stage_offset(weights: &[f64], index: usize) -> f64 {
    let end = index.min(weights.len());
    clamp_fraction(weights[..end].iter().sum())
}

/// Map a local fraction of stage `index` into overall progress.
///
/// Values within [`WEIGHT_EPSILON`] of 1.0 snap to exactly 1.0 so the final
/// emission of the last stage reads as complete despite float rounding.
pub fn overall_progress(weights: &[f64], index: usize, local: f64) -> f64 {
    let weight = weights.get(index).copied().unwrap_or(0.0);
    let value = clamp_fraction(stage_offset(weights, index) + weight * clamp_fraction(local));
    if (1.0 - value).abs() <= WEIGHT_EPSILON {
        1.0
    } else {
        value
    }
}

/// Convert an overall fraction to a whole percentage (0..=100).
pub fn to_percent(fraction: f64) -> u8 {
    (clamp_fraction(fraction) * 100.0).round() as u8
}

/// Outcome of offering a new value to a [`MonotonicProgress`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressStep {
    /// The value is at or above the last one and becomes current.
    Advanced(f64),
    /// The value is below the last one; the current value is unchanged.
    Regressed { current: f64, offered: f64 },
}

/// Guards a job's published progress against regression.
///
/// Listeners must observe non-decreasing overall progress, so a stage that
/// reports a lower fraction than before is ignored (and reported back so the
/// caller can log it).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MonotonicProgress {
    current: f64,
}

impl MonotonicProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    /// Offer a new overall value (already clamped by the caller or not).
    pub fn offer(&mut self, value: f64) -> ProgressStep {
        let value = clamp_fraction(value);
        if value + f64::EPSILON < self.current {
            ProgressStep::Regressed {
                current: self.current,
                offered: value,
            }
        } else {
            self.current = self.current.max(value);
            ProgressStep::Advanced(self.current)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
