use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use vid3d_core::job_events::MSG_TYPE_JOB_SNAPSHOT;
use vid3d_core::types::JobId;

use crate::error::AppResult;
use crate::handlers::jobs::JobStatusView;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Follow a single job instead of every job.
    pub job_id: Option<JobId>,
}

/// GET /api/ws[?job_id=]
///
/// Upgrades the connection to WebSocket. With `job_id` the socket first
/// receives a `job_snapshot` of that job, then its events, and is closed
/// after the terminal event (immediately if the job already finished).
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> AppResult<impl IntoResponse> {
    if let Some(job_id) = params.job_id {
        state.jobs.get(job_id).await?;
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, params.job_id)))
}

/// A job's current view, tagged as a `job_snapshot` message.
struct Snapshot {
    message: Message,
    overall: f64,
    finished: bool,
}

async fn snapshot(state: &AppState, job_id: JobId) -> Option<Snapshot> {
    let record = state.jobs.get(job_id).await.ok()?;
    let position = state.jobs.queue_position(job_id).await;
    let mut payload = serde_json::to_value(JobStatusView::new(&record, position)).ok()?;
    payload["type"] = MSG_TYPE_JOB_SNAPSHOT.into();
    Some(Snapshot {
        message: Message::Text(payload.to_string().into()),
        overall: record.overall_progress,
        finished: record.is_terminal(),
    })
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with `WsManager`.
///   2. Sends the job snapshot, if following one job.
///   3. Spawns a sender task that forwards messages from the manager channel.
///   4. Processes inbound messages on the current task.
///   5. Cleans up on disconnect.
async fn handle_socket(socket: WebSocket, state: AppState, job_id: Option<JobId>) {
    let ws_manager = Arc::clone(&state.ws_manager);
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, job_id = ?job_id, "WebSocket connected");

    // Register before taking the snapshot so no event falls in between.
    let mut rx = match job_id {
        Some(job_id) => ws_manager.add_awaiting_snapshot(conn_id.clone(), job_id).await,
        None => ws_manager.add(conn_id.clone(), None).await,
    };

    let (mut sink, mut stream) = socket.split();

    if let Some(job_id) = job_id {
        let finished = match snapshot(&state, job_id).await {
            Some(snapshot) => {
                ws_manager.set_progress_floor(&conn_id, snapshot.overall).await;
                sink.send(snapshot.message).await.is_err() || snapshot.finished
            }
            None => true,
        };
        if finished {
            let _ = sink.send(Message::Close(None)).await;
            ws_manager.remove(&conn_id).await;
            tracing::info!(conn_id = %conn_id, job_id = %job_id, "WebSocket closed after snapshot");
            return;
        }
    }

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Receiver loop: inbound messages are only used for liveness.
    loop {
        tokio::select! {
            _ = &mut send_task => break,
            next = stream.next() => match next {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(conn_id = %conn_id, "Pong received");
                }
                Some(Ok(_msg)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    // Clean up: remove connection and abort sender task.
    ws_manager.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}
