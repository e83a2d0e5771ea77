use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{FileResult, JobRecord, JobStatus, OutputFormat};

/// Request to start converting an uploaded batch.
#[derive(Debug, Deserialize, Validate)]
pub struct ConvertRequest {
    #[garde(skip)]
    #[serde(alias = "conversionId", alias = "conversion_id")]
    pub job_id: Uuid,

    /// `png` (default), `jpeg` or `jpg`.
    #[garde(length(min = 1, max = 8))]
    pub format: Option<String>,

    #[garde(range(min = 72, max = 1200))]
    pub density: Option<u32>,

    #[garde(range(min = 1, max = 100))]
    pub quality: Option<u8>,
}

/// Name and size of an accepted upload.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct UploadedFileSummary {
    pub name: String,
    pub size: u64,
}

/// Response after uploading a batch.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub files: Vec<UploadedFileSummary>,
}

/// Response to a start-conversion request.
#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
}

/// Read-only view of a job for polling clients. Never exposes filesystem paths.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub format: Option<OutputFormat>,
    pub files: Vec<UploadedFileSummary>,
    pub results: Vec<FileResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub download_url: Option<String>,
}

impl From<JobRecord> for JobStatusResponse {
    fn from(job: JobRecord) -> Self {
        let download_url = (job.status == JobStatus::Completed)
            .then(|| format!("/api/v1/download/{}", job.id));

        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            format: job.format,
            files: job
                .files
                .into_iter()
                .map(|f| UploadedFileSummary {
                    name: f.name,
                    size: f.size,
                })
                .collect(),
            results: job.results,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error,
            download_url,
        }
    }
}
