//! Handlers for job status polling, listing, cancellation, removal and
//! artifact download.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use indexmap::IndexMap;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use vid3d_core::error::CoreError;
use vid3d_core::job::{ArtifactRef, JobError, JobRecord, JobStatus};
use vid3d_core::progress::to_percent;
use vid3d_core::types::{JobId, Timestamp};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Progress block of a status response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub stage: Option<String>,
    /// Overall job progress as a whole percentage.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_frame: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<u32>,
}

/// Wire shape returned by the status endpoint and pushed as a WebSocket
/// snapshot.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: &'static str,
    pub mode: String,
    pub progress: ProgressView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    pub artifacts: IndexMap<String, ArtifactRef>,
    pub created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

impl JobStatusView {
    pub fn new(record: &JobRecord, queue_position: Option<usize>) -> Self {
        Self {
            job_id: record.id,
            status: record.status.label(),
            mode: record.variant.name.clone(),
            progress: ProgressView {
                stage: record.stage_progress.stage.clone(),
                progress: to_percent(record.overall_progress),
                current_frame: record.stage_progress.current_frame,
                total_frames: record.stage_progress.total_frames,
            },
            error: record.error.clone(),
            queue_position,
            artifacts: record.artifacts.clone(),
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
        }
    }
}

async fn status_view(state: &AppState, record: &JobRecord) -> JobStatusView {
    let position = match record.status {
        JobStatus::Queued => state.jobs.queue_position(record.id).await,
        _ => None,
    };
    JobStatusView::new(record, position)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// GET /api/status/{id}
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<Json<JobStatusView>> {
    let record = state.jobs.get(job_id).await?;
    Ok(Json(status_view(&state, &record).await))
}

/// GET /api/jobs
///
/// All jobs in submission order.
pub async fn list_jobs(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<JobStatusView>>>> {
    let records = state.jobs.list().await;
    let mut views = Vec::with_capacity(records.len());
    for record in &records {
        views.push(status_view(&state, record).await);
    }
    Ok(Json(DataResponse { data: views }))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// POST /api/jobs/{id}/cancel
///
/// A queued job fails immediately; a running job fails once its current
/// stage returns. Returns 409 if the job already finished.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<StatusCode> {
    state.jobs.cancel(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/jobs/{id}
///
/// Removes a finished job and its work directory. Returns 409 while the job
/// is still queued or running.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<StatusCode> {
    state.jobs.remove(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Artifact download
// ---------------------------------------------------------------------------

fn artifact_not_found(job_id: JobId) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "Artifact",
        id: job_id,
    })
}

/// Map a file extension to a MIME content type for artifact downloads.
fn content_type_for(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("ply") => "application/ply",
        Some("json") => "application/json",
        Some("obj") => "model/obj",
        Some("glb") => "model/gltf-binary",
        _ => "application/octet-stream",
    }
}

/// GET /api/jobs/{id}/artifact
///
/// Streams the final artifact of a completed job.
pub async fn download_artifact(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<Response> {
    let record = state.jobs.get(job_id).await?;
    if record.status != JobStatus::Completed {
        return Err(artifact_not_found(job_id));
    }
    let path = record
        .final_artifact()
        .and_then(|(_, artifact)| artifact.as_path())
        .ok_or_else(|| artifact_not_found(job_id))?
        .to_path_buf();

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(m) if m.is_file() => m,
        _ => return Err(artifact_not_found(job_id)),
    };
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let headers = [
        (header::CONTENT_TYPE, content_type_for(&path).to_string()),
        (header::CONTENT_LENGTH, metadata.len().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{job_id}-{file_name}\""),
        ),
    ];

    tracing::debug!(job_id = %job_id, path = %path.display(), "Serving artifact");
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}
