//! Per-job cancellation handle.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use vid3d_core::job::FailureKind;

/// Cancellation signal for one job, shared between the service (which
/// raises it on user request or timeout) and the orchestrator (which checks
/// it between stages and hands it to every stage).
///
/// The first reason recorded wins: a job that times out after the user
/// already cancelled it still reports `Cancelled`.
#[derive(Debug, Clone, Default)]
pub struct JobControl {
    token: CancellationToken,
    reason: Arc<OnceLock<FailureKind>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Returns `false` if it was already raised.
    pub fn cancel(&self, kind: FailureKind) -> bool {
        let first = self.reason.set(kind).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Why the signal was raised, if it was.
    pub fn reason(&self) -> Option<FailureKind> {
        self.reason.get().copied()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reason_wins() {
        let control = JobControl::new();
        assert!(!control.is_cancelled());
        assert_eq!(control.reason(), None);

        assert!(control.cancel(FailureKind::Cancelled));
        assert!(!control.cancel(FailureKind::TimedOut));

        assert!(control.is_cancelled());
        assert_eq!(control.reason(), Some(FailureKind::Cancelled));
    }

    #[test]
    fn clones_share_the_signal() {
        let control = JobControl::new();
        let token = control.token();
        control.clone().cancel(FailureKind::TimedOut);
        assert!(token.is_cancelled());
        assert_eq!(control.reason(), Some(FailureKind::TimedOut));
    }
}
