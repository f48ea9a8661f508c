//! Asynchronous multi-stage job pipeline.
//!
//! - [`stage`]: the [`StageWorker`] contract every stage implements.
//! - [`store`]: [`JobStore`], the in-memory registry of job records.
//! - [`orchestrator`]: [`PipelineOrchestrator`], which drives one job's
//!   stages in order and maps stage-local progress into overall progress.
//! - [`scheduler`]: [`ResourceScheduler`], the admission queue and
//!   memory-pressure-driven concurrency limit.
//! - [`registry`]: named pipeline variants bound to their workers.
//! - [`workers`]: built-in placeholder stage workers.
//! - [`service`]: [`JobService`], the facade used by the HTTP layer.

pub mod config;
pub mod control;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod stage;
pub mod store;
pub mod workers;

pub use config::PipelineConfig;
pub use control::JobControl;
pub use error::StageError;
pub use orchestrator::PipelineOrchestrator;
pub use registry::{StageDefinition, VariantRegistry};
pub use scheduler::{MemorySampler, ResourceScheduler, SchedulerSnapshot, SystemMemorySampler};
pub use service::{JobService, SubmitJob, Submission};
pub use stage::{StageContext, StageInput, StageWorker};
pub use store::{JobStore, StatusCounts};
