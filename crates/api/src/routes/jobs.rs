//! Route definitions for the `/jobs` resource.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// DELETE /{id}            -> delete_job
/// POST   /{id}/cancel     -> cancel_job
/// GET    /{id}/artifact   -> download_artifact
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs))
        .route("/{id}", delete(jobs::delete_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/artifact", get(jobs::download_artifact))
}
