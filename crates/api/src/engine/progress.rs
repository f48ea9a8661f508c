//! Forwards job events from the [`ProgressReporter`] feed to WebSocket
//! clients.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use vid3d_events::ProgressReporter;

use crate::ws::WsManager;

/// Spawn the forwarder task. It stops when `cancel` fires or the reporter is
/// dropped.
pub fn start_progress_forwarder(
    reporter: &ProgressReporter,
    ws_manager: Arc<WsManager>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut feed = reporter.subscribe_all();

    tokio::spawn(async move {
        tracing::info!("Progress forwarder started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                next = feed.recv() => match next {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Progress forwarder lagged behind the event feed");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            let delivered = ws_manager.send_job_event(&event).await;
            tracing::trace!(
                job_id = %event.job_id,
                kind = event.kind.message_type(),
                delivered,
                "Job event forwarded",
            );
        }
        tracing::info!("Progress forwarder stopped");
    })
}
