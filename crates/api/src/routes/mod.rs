pub mod health;
pub mod jobs;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the `/api` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws                          WebSocket (optional ?job_id=)
///
/// /upload                      upload a video and submit a job (POST)
/// /status/{id}                 job status polling
///
/// /jobs                        list
/// /jobs/{id}                   delete finished job
/// /jobs/{id}/cancel            cancel (POST)
/// /jobs/{id}/artifact          final artifact download
///
/// /variants                    registered pipeline variants
/// /scheduler                   concurrency limit, running and queued jobs
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_handler))
        // Upload and polling
        .route("/upload", post(handlers::upload::upload_video))
        .route("/status/{id}", get(handlers::jobs::get_status))
        // Job management
        .nest("/jobs", jobs::router())
        // Pipeline introspection
        .route("/variants", get(handlers::pipeline::list_variants))
        .route("/scheduler", get(handlers::pipeline::scheduler_snapshot))
}
