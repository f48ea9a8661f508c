//! Read-only views of the pipeline configuration and scheduler state.

use axum::extract::State;
use axum::Json;
use vid3d_core::variant::PipelineVariant;
use vid3d_pipeline::SchedulerSnapshot;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/variants
pub async fn list_variants(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<PipelineVariant>>>> {
    Ok(Json(DataResponse {
        data: state.jobs.variants(),
    }))
}

/// GET /api/scheduler
///
/// Current concurrency limit, running jobs and the waiting queue with
/// positions and ages.
pub async fn scheduler_snapshot(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<SchedulerSnapshot>>> {
    Ok(Json(DataResponse {
        data: state.jobs.scheduler_snapshot().await,
    }))
}
