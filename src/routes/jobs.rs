use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::conversion::{
    ConvertRequest, ConvertResponse, JobStatusResponse, UploadResponse, UploadedFileSummary,
};
use crate::routes::ApiError;
use crate::services::orchestrator::{JobError, StartOutcome};
use crate::services::submission::{self, UploadedFile};

/// POST /api/v1/upload: Upload a batch of PDFs (multipart field `files`).
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut uploads = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read {}: {}", file_name, e)))?;

        uploads.push(UploadedFile {
            file_name,
            content_type,
            data: data.to_vec(),
        });
    }

    let job = submission::submit(&state.store, uploads).await?;

    Ok(Json(UploadResponse {
        job_id: job.id,
        status: job.status,
        files: job
            .files
            .into_iter()
            .map(|f| UploadedFileSummary {
                name: f.name,
                size: f.size,
            })
            .collect(),
    }))
}

/// POST /api/v1/convert: Start converting an uploaded batch.
///
/// Returns 202 once the job is `processing`; the batch keeps running after the
/// response. A job that is already running or finished is returned unchanged.
pub async fn start_conversion(
    State(state): State<AppState>,
    Json(request): Json<ConvertRequest>,
) -> Result<(StatusCode, Json<ConvertResponse>), ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let options = state.orchestrator.defaults().resolve(
        request.format.as_deref(),
        request.density,
        request.quality,
    )?;

    match state
        .orchestrator
        .start_conversion(request.job_id, options)
        .await?
    {
        StartOutcome::Started { job, .. } => Ok((
            StatusCode::ACCEPTED,
            Json(ConvertResponse {
                job_id: job.id,
                status: job.status,
                progress: job.progress,
                message: "Conversion started".to_string(),
            }),
        )),
        StartOutcome::AlreadyActive(job) => Ok((
            StatusCode::OK,
            Json(ConvertResponse {
                job_id: job.id,
                status: job.status,
                progress: job.progress,
                message: format!("Conversion already {}", job.status),
            }),
        )),
    }
}

/// GET /api/v1/status/{job_id}: Poll a job.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.store.load(job_id).await.map_err(JobError::from)?;
    Ok(Json(JobStatusResponse::from(job)))
}

/// GET /api/v1/download/{job_id}: Download the ZIP of a completed job.
pub async fn download(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.orchestrator.download(job_id).await?;
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(JobError::ArchiveMissing(job_id).into());
        }
        Err(e) => return Err(ApiError::Internal(format!("failed to read archive: {}", e))),
    };

    tracing::info!(job_id = %job_id, bytes = bytes.len(), "Serving archive");

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"converted_images_{}.zip\"", job_id),
            ),
        ],
        bytes,
    ))
}
