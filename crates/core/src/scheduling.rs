//! Job admission constants, queue ordering and the memory-pressure policy.
//!
//! This module is pure: the scheduler in the pipeline crate owns the shared
//! state and calls into these functions under its lock.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Priority constants
// ---------------------------------------------------------------------------

/// Priority value for urgent jobs. Admitted before all others.
pub const PRIORITY_URGENT: i32 = 10;

/// Priority value for normal jobs. Default.
pub const PRIORITY_NORMAL: i32 = 0;

/// Priority value for background jobs. Admitted last.
pub const PRIORITY_BACKGROUND: i32 = -10;

/// Memory usage fraction above which concurrency is reduced.
pub const DEFAULT_HIGH_WATER: f64 = 0.85;

/// Memory usage fraction below which concurrency may grow.
pub const DEFAULT_LOW_WATER: f64 = 0.50;

/// Parse a priority given either as a name or an integer.
pub fn parse_priority(value: &str) -> Result<i32, CoreError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "urgent" => Ok(PRIORITY_URGENT),
        "normal" | "" => Ok(PRIORITY_NORMAL),
        "background" => Ok(PRIORITY_BACKGROUND),
        other => other.parse::<i32>().map_err(|_| {
            CoreError::Validation(format!(
                "Unknown priority '{other}', expected urgent, normal, background or an integer"
            ))
        }),
    }
}

// ---------------------------------------------------------------------------
// Resource class
// ---------------------------------------------------------------------------

/// What kind of hardware a job mostly leans on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    #[default]
    Cpu,
    Gpu,
}

impl FromStr for ResourceClass {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(ResourceClass::Cpu),
            "gpu" => Ok(ResourceClass::Gpu),
            other => Err(CoreError::Validation(format!(
                "Unknown resource class '{other}', expected cpu or gpu"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Queue entries
// ---------------------------------------------------------------------------

/// A job waiting for admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerEntry {
    pub job_id: JobId,
    pub priority: i32,
    pub resource_class: ResourceClass,
    pub enqueued_at: Timestamp,
}

/// Result of asking the scheduler to run a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "position", rename_all = "lowercase")]
pub enum Admission {
    /// The job may start now.
    Started,
    /// The job waits at this 1-based queue position.
    Queued(usize),
}

/// Index at which an entry with `priority` is inserted into `queue`.
///
/// The queue is ordered by priority descending, FIFO within equal priority,
/// so the new entry goes after every entry with priority >= its own.
pub fn insertion_index(queue: &[SchedulerEntry], priority: i32) -> usize {
    queue.partition_point(|e| e.priority >= priority)
}

// ---------------------------------------------------------------------------
// Memory pressure policy
// ---------------------------------------------------------------------------

/// Water marks used to adapt the concurrency limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressurePolicy {
    pub high_water: f64,
    pub low_water: f64,
}

impl Default for PressurePolicy {
    fn default() -> Self {
        Self {
            high_water: DEFAULT_HIGH_WATER,
            low_water: DEFAULT_LOW_WATER,
        }
    }
}

impl PressurePolicy {
    pub fn validate(&self) -> Result<(), CoreError> {
        let in_range = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_range(self.high_water) || !in_range(self.low_water) {
            return Err(CoreError::Validation(
                "Memory water marks must be within [0, 1]".to_string(),
            ));
        }
        if self.low_water >= self.high_water {
            return Err(CoreError::Validation(format!(
                "Low water mark {} must be below high water mark {}",
                self.low_water, self.high_water
            )));
        }
        Ok(())
    }
}

/// Compute the next concurrency limit from observed memory usage.
///
/// - Above the high-water mark: shrink by one, never below 1.
/// - Below the low-water mark with demand: grow by one, never above
///   `hardware_max`.
/// - Otherwise unchanged.
///
/// `used_fraction` is the share of physical memory in use (`0.0..=1.0`).
pub fn adjust_concurrency(
    current: usize,
    hardware_max: usize,
    used_fraction: f64,
    has_demand: bool,
    policy: &PressurePolicy,
) -> usize {
    let hardware_max = hardware_max.max(1);
    let current = current.clamp(1, hardware_max);

    if used_fraction > policy.high_water {
        current.saturating_sub(1).max(1)
    } else if used_fraction < policy.low_water && has_demand {
        (current + 1).min(hardware_max)
    } else {
        current
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(priority: i32) -> SchedulerEntry {
        SchedulerEntry {
            job_id: JobId::new(),
            priority,
            resource_class: ResourceClass::Cpu,
            enqueued_at: Utc::now(),
        }
    }

    // -- insertion_index -----------------------------------------------------

    #[test]
    fn insertion_into_empty_queue() {
        assert_eq!(insertion_index(&[], PRIORITY_NORMAL), 0);
    }

    #[test]
    fn equal_priority_is_fifo() {
        let q = vec![entry(0), entry(0)];
        assert_eq!(insertion_index(&q, 0), 2);
    }

    #[test]
    fn higher_priority_jumps_ahead() {
        let q = vec![entry(PRIORITY_URGENT), entry(0), entry(PRIORITY_BACKGROUND)];
        assert_eq!(insertion_index(&q, 5), 1);
        assert_eq!(insertion_index(&q, PRIORITY_URGENT), 1);
        assert_eq!(insertion_index(&q, -20), 3);
    }

    // -- parse_priority ------------------------------------------------------

    #[test]
    fn priority_names_and_numbers() {
        assert_eq!(parse_priority("urgent").unwrap(), PRIORITY_URGENT);
        assert_eq!(parse_priority("Background").unwrap(), PRIORITY_BACKGROUND);
        assert_eq!(parse_priority("").unwrap(), PRIORITY_NORMAL);
        assert_eq!(parse_priority("3").unwrap(), 3);
        assert!(parse_priority("soon").is_err());
    }

    #[test]
    fn resource_class_parses() {
        assert_eq!("GPU".parse::<ResourceClass>().unwrap(), ResourceClass::Gpu);
        assert!("tpu".parse::<ResourceClass>().is_err());
    }

    // -- adjust_concurrency --------------------------------------------------

    #[test]
    fn high_pressure_shrinks_with_floor_of_one() {
        let p = PressurePolicy::default();
        assert_eq!(adjust_concurrency(3, 8, 0.9, true, &p), 2);
        assert_eq!(adjust_concurrency(1, 8, 0.99, true, &p), 1);
    }

    #[test]
    fn low_pressure_grows_only_with_demand() {
        let p = PressurePolicy::default();
        assert_eq!(adjust_concurrency(3, 8, 0.2, true, &p), 4);
        assert_eq!(adjust_concurrency(3, 8, 0.2, false, &p), 3);
    }

    #[test]
    fn growth_capped_at_hardware_max() {
        let p = PressurePolicy::default();
        assert_eq!(adjust_concurrency(8, 8, 0.1, true, &p), 8);
    }

    #[test]
    fn between_marks_is_stable() {
        let p = PressurePolicy::default();
        assert_eq!(adjust_concurrency(4, 8, 0.7, true, &p), 4);
    }

    #[test]
    fn inverted_water_marks_rejected() {
        let p = PressurePolicy {
            high_water: 0.4,
            low_water: 0.6,
        };
        assert!(p.validate().is_err());
        assert!(PressurePolicy::default().validate().is_ok());
    }

    #[test]
    fn admission_serializes_tagged() {
        let json = serde_json::to_value(Admission::Queued(2)).unwrap();
        assert_eq!(json["outcome"], "queued");
        assert_eq!(json["position"], 2);
    }
}
