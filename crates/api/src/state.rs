use std::sync::Arc;

use vid3d_pipeline::JobService;

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Job lifecycle facade (submission, status, cancellation).
    pub jobs: Arc<JobService>,
    /// WebSocket connection manager (browser clients).
    pub ws_manager: Arc<WsManager>,
}
