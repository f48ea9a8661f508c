use std::path::PathBuf;
use std::time::Duration;

use vid3d_core::scheduling::{PressurePolicy, DEFAULT_HIGH_WATER, DEFAULT_LOW_WATER};
use vid3d_core::variant::VARIANT_STANDARD;

/// Pipeline configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root directory for per-job intermediate artifacts.
    pub work_dir: PathBuf,
    /// Variant used when a submission names none.
    pub default_variant: String,
    /// Initial concurrency limit.
    pub max_concurrent_jobs: usize,
    /// Upper bound the adaptive limit may grow to.
    pub hardware_max_concurrent: usize,
    /// How often memory pressure is sampled. Zero disables adaptation.
    pub adapt_interval: Duration,
    pub pressure: PressurePolicy,
    /// Wall-clock limit per job. `None` means unlimited.
    pub job_timeout: Option<Duration>,
    /// ffmpeg binary used by frame extraction. Simulated when unset.
    pub ffmpeg_path: Option<PathBuf>,
    /// Delay between steps of the simulated stages.
    pub simulated_step: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("vid3d-work"),
            default_variant: VARIANT_STANDARD.to_string(),
            max_concurrent_jobs: 2,
            hardware_max_concurrent: default_hardware_max(),
            adapt_interval: Duration::from_secs(5),
            pressure: PressurePolicy::default(),
            job_timeout: None,
            ffmpeg_path: None,
            simulated_step: Duration::from_millis(50),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                 |
    /// |---------------------------------|-------------------------|
    /// | `WORK_DIR`                      | `$TMPDIR/vid3d-work`    |
    /// | `DEFAULT_VARIANT`               | `standard`              |
    /// | `MAX_CONCURRENT_JOBS`           | `2`                     |
    /// | `HARDWARE_MAX_CONCURRENT`       | available parallelism   |
    /// | `SCHEDULER_ADAPT_INTERVAL_SECS` | `5` (`0` disables)      |
    /// | `MEMORY_HIGH_WATER`             | `0.85`                  |
    /// | `MEMORY_LOW_WATER`              | `0.50`                  |
    /// | `JOB_TIMEOUT_SECS`              | unset (no timeout)      |
    /// | `FFMPEG_PATH`                   | unset (simulated)       |
    /// | `SIMULATED_STEP_MILLIS`         | `50`                    |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let work_dir = std::env::var("WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.work_dir);

        let default_variant =
            std::env::var("DEFAULT_VARIANT").unwrap_or(defaults.default_variant);

        let max_concurrent_jobs: usize = std::env::var("MAX_CONCURRENT_JOBS")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .expect("MAX_CONCURRENT_JOBS must be a valid usize");

        let hardware_max_concurrent: usize = std::env::var("HARDWARE_MAX_CONCURRENT")
            .map(|v| {
                v.parse()
                    .expect("HARDWARE_MAX_CONCURRENT must be a valid usize")
            })
            .unwrap_or(defaults.hardware_max_concurrent);

        let adapt_interval_secs: u64 = std::env::var("SCHEDULER_ADAPT_INTERVAL_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("SCHEDULER_ADAPT_INTERVAL_SECS must be a valid u64");

        let high_water: f64 = std::env::var("MEMORY_HIGH_WATER")
            .unwrap_or_else(|_| DEFAULT_HIGH_WATER.to_string())
            .parse()
            .expect("MEMORY_HIGH_WATER must be a valid f64");

        let low_water: f64 = std::env::var("MEMORY_LOW_WATER")
            .unwrap_or_else(|_| DEFAULT_LOW_WATER.to_string())
            .parse()
            .expect("MEMORY_LOW_WATER must be a valid f64");

        let job_timeout = std::env::var("JOB_TIMEOUT_SECS").ok().map(|v| {
            Duration::from_secs(v.parse().expect("JOB_TIMEOUT_SECS must be a valid u64"))
        });

        let ffmpeg_path = std::env::var("FFMPEG_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let simulated_step_millis: u64 = std::env::var("SIMULATED_STEP_MILLIS")
            .unwrap_or_else(|_| "50".into())
            .parse()
            .expect("SIMULATED_STEP_MILLIS must be a valid u64");

        Self {
            work_dir,
            default_variant,
            max_concurrent_jobs: max_concurrent_jobs.max(1),
            hardware_max_concurrent: hardware_max_concurrent.max(1),
            adapt_interval: Duration::from_secs(adapt_interval_secs),
            pressure: PressurePolicy {
                high_water,
                low_water,
            },
            job_timeout,
            ffmpeg_path,
            simulated_step: Duration::from_millis(simulated_step_millis),
        }
    }
}

fn default_hardware_max() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}
