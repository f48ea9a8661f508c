//! Domain types and pure logic for the video-to-3D job pipeline.
//!
//! Nothing in this crate performs I/O. The job record model, pipeline
//! variants, progress arithmetic and scheduling policy all live here so the
//! pipeline runtime and the HTTP layer share one definition of each.

pub mod error;
pub mod job;
pub mod job_events;
pub mod options;
pub mod progress;
pub mod scheduling;
pub mod types;
pub mod variant;
