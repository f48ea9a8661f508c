//! Message type constants for job lifecycle events.
//!
//! Used by the progress reporter when tagging events and by the API when
//! forwarding them to WebSocket clients.

/// Job accepted but waiting for a free slot.
pub const MSG_TYPE_JOB_QUEUED: &str = "job_queued";

/// Job admitted by the scheduler; first stage about to run.
pub const MSG_TYPE_JOB_STARTED: &str = "job_started";

/// A stage began.
pub const MSG_TYPE_STAGE_STARTED: &str = "stage_started";

/// Progress update during stage execution.
pub const MSG_TYPE_JOB_PROGRESS: &str = "job_progress";

/// A stage finished and produced an artifact.
pub const MSG_TYPE_STAGE_COMPLETED: &str = "stage_completed";

/// Job completed successfully.
pub const MSG_TYPE_JOB_COMPLETED: &str = "job_completed";

/// Job failed (stage failure, cancellation or timeout).
pub const MSG_TYPE_JOB_FAILED: &str = "job_failed";

/// Current state of one job, sent when a client starts following it.
pub const MSG_TYPE_JOB_SNAPSHOT: &str = "job_snapshot";
