//! Video upload: stores the file and submits a processing job.

use std::path::{Path, PathBuf};

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use vid3d_core::options::{Quality, StageOptions};
use vid3d_core::scheduling::{parse_priority, Admission, ResourceClass};
use vid3d_core::types::JobId;
use vid3d_pipeline::SubmitJob;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Multipart field names accepted for the video file.
const FILE_FIELDS: &[&str] = &["video", "file"];

/// Longest original filename kept in the stored name.
const MAX_STORED_NAME_LEN: usize = 100;

/// Response body for an accepted upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub job_id: JobId,
    /// `processing` when admitted immediately, `queued` otherwise.
    pub status: &'static str,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

/// Text fields of the upload form.
#[derive(Debug, Default)]
struct UploadForm {
    mode: Option<String>,
    quality: Option<String>,
    max_frames: Option<String>,
    priority: Option<String>,
    resource_class: Option<String>,
}

impl UploadForm {
    fn into_submission(self, source: PathBuf) -> AppResult<SubmitJob> {
        let mut request = SubmitJob::new(source);
        request.variant = self.mode;

        let mut options = StageOptions::default();
        if let Some(quality) = self.quality.as_deref().filter(|q| !q.trim().is_empty()) {
            options.quality = quality.parse::<Quality>()?;
        }
        if let Some(max_frames) = self.max_frames.as_deref().filter(|m| !m.trim().is_empty()) {
            let parsed = max_frames.trim().parse::<u32>().map_err(|_| {
                AppError::BadRequest(format!("maxFrames must be a positive integer, got '{max_frames}'"))
            })?;
            options.max_frames = Some(parsed);
        }
        request.options = options;

        if let Some(priority) = self.priority.as_deref() {
            request.priority = parse_priority(priority)?;
        }
        if let Some(class) = self.resource_class.as_deref().filter(|c| !c.trim().is_empty()) {
            request.resource_class = class.parse::<ResourceClass>()?;
        }
        Ok(request)
    }
}

/// Keep ASCII alphanumerics, `.`, `-` and `_` so a client filename cannot
/// escape the upload directory.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STORED_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload.mp4".to_string()
    } else {
        cleaned.to_string()
    }
}

async fn remove_upload(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to delete upload");
        }
    }
}

/// Read every multipart field, streaming the video to disk.
///
/// `saved` is set as soon as the file is created so the caller can delete it
/// if anything later fails.
async fn read_form(
    multipart: &mut Multipart,
    upload_dir: &Path,
    saved: &mut Option<PathBuf>,
) -> AppResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();

        if FILE_FIELDS.contains(&name.as_str()) {
            if saved.is_some() {
                return Err(AppError::BadRequest("Only one video file may be uploaded".into()));
            }
            let content_type = field.content_type().unwrap_or("").to_string();
            if !content_type.starts_with("video/") {
                return Err(AppError::BadRequest(format!(
                    "Uploaded file must be a video, got content type '{content_type}'"
                )));
            }

            let file_name = sanitize_file_name(field.file_name().unwrap_or(""));
            let path = upload_dir.join(format!("{}-{file_name}", uuid::Uuid::new_v4()));
            let mut file = tokio::fs::File::create(&path)
                .await
                .map_err(|e| AppError::InternalError(e.to_string()))?;
            *saved = Some(path);

            let mut size: u64 = 0;
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?
            {
                size += chunk.len() as u64;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| AppError::InternalError(e.to_string()))?;
            }
            file.flush()
                .await
                .map_err(|e| AppError::InternalError(e.to_string()))?;

            if size == 0 {
                return Err(AppError::BadRequest("Uploaded video is empty".into()));
            }
            tracing::debug!(file_name = %file_name, size, "Video upload stored");
            continue;
        }

        let slot = match name.as_str() {
            "mode" => &mut form.mode,
            "quality" => &mut form.quality,
            "maxFrames" => &mut form.max_frames,
            "priority" => &mut form.priority,
            "resourceClass" => &mut form.resource_class,
            _ => continue, // ignore unknown fields
        };
        let text = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        *slot = Some(text);
    }

    Ok(form)
}

/// POST /api/upload
///
/// Accepts a multipart form with a required video field (`video` or `file`)
/// and optional `mode`, `quality`, `maxFrames`, `priority` and
/// `resourceClass` text fields. The stored file is deleted if the request is
/// rejected.
pub async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let mut saved: Option<PathBuf> = None;

    let result = async {
        let form = read_form(&mut multipart, &state.config.upload_dir, &mut saved).await?;
        let source = saved
            .clone()
            .ok_or_else(|| AppError::BadRequest("No video file uploaded".into()))?;
        let request = form.into_submission(source)?;
        Ok::<_, AppError>(state.jobs.submit(request).await?)
    }
    .await;

    let submission = match result {
        Ok(submission) => submission,
        Err(e) => {
            if let Some(path) = saved {
                remove_upload(&path).await;
            }
            return Err(e);
        }
    };

    let (status, queue_position) = match submission.admission {
        Admission::Started => ("processing", None),
        Admission::Queued(position) => ("queued", Some(position)),
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            job_id: submission.job.id,
            status,
            mode: submission.job.variant.name,
            queue_position,
        }),
    ))
}
