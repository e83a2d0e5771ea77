use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::app_state::AppState;
use crate::services::orchestrator::JobError;
use crate::services::submission::SubmissionError;

pub mod cleanup;
pub mod health;
pub mod jobs;

/// API routes. Layers and the metrics endpoint are added by the binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/upload", post(jobs::upload))
        .route("/api/v1/convert", post(jobs::start_conversion))
        .route("/api/v1/status/{job_id}", get(jobs::job_status))
        .route("/api/v1/download/{job_id}", get(jobs::download))
        .route("/api/v1/cleanup", post(cleanup::run_cleanup))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Error returned by route handlers, rendered as `{ "error": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Job(e) => match e {
                JobError::NotFound(_) | JobError::ArchiveMissing(_) => StatusCode::NOT_FOUND,
                JobError::PreconditionFailed(_) => StatusCode::CONFLICT,
                JobError::CapabilityUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                JobError::InvalidOptions(_) => StatusCode::BAD_REQUEST,
                JobError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Submission(e) => match e {
                SubmissionError::Empty | SubmissionError::InvalidName(_) => StatusCode::BAD_REQUEST,
                SubmissionError::NotPdf(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                SubmissionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
