use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};
use vid3d_core::types::{JobId, Timestamp};
use vid3d_events::{JobEvent, JobEventKind};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    /// The one job this connection follows; `None` follows every job.
    pub job_id: Option<JobId>,
    /// Channel sender for outbound messages to this connection.
    pub sender: WsSender,
    /// When this connection was established.
    pub connected_at: Timestamp,
    /// Progress at or below this overall value is not forwarded; the
    /// connection already saw it in a snapshot.
    pub progress_floor: Option<f64>,
}

impl WsConnection {
    fn follows(&self, job_id: JobId) -> bool {
        self.job_id.is_none_or(|id| id == job_id)
    }

    fn wants(&self, event: &JobEvent) -> bool {
        if !self.follows(event.job_id) {
            return false;
        }
        match (&event.kind, self.progress_floor) {
            (JobEventKind::Progress { overall, .. }, Some(floor)) => *overall > floor,
            _ => true,
        }
    }
}

/// Manages all active WebSocket connections.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application.
pub struct WsManager {
    connections: RwLock<HashMap<String, WsConnection>>,
}

impl WsManager {
    /// Create a new, empty connection manager.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink.
    pub async fn add(
        &self,
        conn_id: String,
        job_id: Option<JobId>,
    ) -> mpsc::UnboundedReceiver<Message> {
        self.insert(conn_id, job_id, None).await
    }

    /// Register a connection that is about to be sent a snapshot of `job_id`.
    ///
    /// Progress events are held back until [`set_progress_floor`] records
    /// the snapshot's value; anything delivered before then is already
    /// reflected in the snapshot.
    ///
    /// [`set_progress_floor`]: WsManager::set_progress_floor
    pub async fn add_awaiting_snapshot(
        &self,
        conn_id: String,
        job_id: JobId,
    ) -> mpsc::UnboundedReceiver<Message> {
        self.insert(conn_id, Some(job_id), Some(f64::INFINITY)).await
    }

    async fn insert(
        &self,
        conn_id: String,
        job_id: Option<JobId>,
        progress_floor: Option<f64>,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = WsConnection {
            job_id,
            sender: tx,
            connected_at: chrono::Utc::now(),
            progress_floor,
        };
        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    /// Forward only progress above `overall` to this connection from now on.
    pub async fn set_progress_floor(&self, conn_id: &str, overall: f64) {
        if let Some(conn) = self.connections.write().await.get_mut(conn_id) {
            conn.progress_floor = Some(overall);
        }
    }

    /// Remove a connection by its ID.
    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Deliver a job event to every connection following that job.
    ///
    /// Connections bound to the job receive a Close frame after its terminal
    /// event. Progress at or below a connection's floor is skipped. Returns
    /// the number of connections the event was sent to.
    pub async fn send_job_event(&self, event: &JobEvent) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(job_id = %event.job_id, error = %e, "Failed to serialize job event");
                return 0;
            }
        };
        let message = Message::Text(payload.into());
        let terminal = event.kind.is_terminal();

        let conns = self.connections.read().await;
        let mut count = 0;
        for conn in conns.values().filter(|c| c.wants(event)) {
            let _ = conn.sender.send(message.clone());
            if terminal && conn.job_id.is_some() {
                let _ = conn.sender.send(Message::Close(None));
            }
            count += 1;
        }
        count
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection, then clear the map.
    ///
    /// Used during graceful shutdown to notify all clients before the
    /// server stops accepting new connections.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Send a Ping frame to every connected client.
    ///
    /// Used by the heartbeat task to keep connections alive and detect
    /// stale ones.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}
