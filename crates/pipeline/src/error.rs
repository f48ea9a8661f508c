//! Stage failure types.

/// Error returned by a [`StageWorker`](crate::stage::StageWorker).
///
/// The orchestrator converts every variant into the job's terminal
/// `JobError`; none of them propagate past the job boundary.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),

    /// The stage observed the job's cancellation signal and stopped early.
    #[error("cancelled")]
    Cancelled,

    #[error("external tool failed (exit code {exit_code:?}): {stderr}")]
    External {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StageError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}
