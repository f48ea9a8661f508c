//! Job progress event plumbing.
//!
//! - [`JobEvent`]: the event envelope published for every job lifecycle
//!   change and progress sample.
//! - [`ProgressReporter`]: in-process publish/subscribe hub with one
//!   channel per active job plus a process-wide feed, backed by
//!   `tokio::sync::broadcast`.

pub mod bus;

pub use bus::{JobEvent, JobEventKind, JobSubscription, ProgressReporter};
