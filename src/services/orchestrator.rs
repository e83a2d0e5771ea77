use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::job::{ConversionOptions, FileResult, JobRecord, JobStatus, OutputFormat};
use crate::services::archive::ArchiveBuilder;
use crate::services::converter::ConversionCapability;
use crate::store::{BeginOutcome, JobStore, StoreError};

const FINAL_SAVE_ATTEMPTS: u32 = 3;
const FINAL_SAVE_BACKOFF_MS: u64 = 200;

/// Options applied when a start request leaves them unset.
#[derive(Debug, Clone, Copy)]
pub struct ConversionDefaults {
    pub format: OutputFormat,
    pub density: u32,
    pub jpeg_quality: u8,
}

impl Default for ConversionDefaults {
    fn default() -> Self {
        Self {
            format: OutputFormat::Png,
            density: 300,
            jpeg_quality: 90,
        }
    }
}

impl ConversionDefaults {
    /// Merge request overrides with the defaults. Quality only applies to JPEG.
    pub fn resolve(
        &self,
        format: Option<&str>,
        density: Option<u32>,
        quality: Option<u8>,
    ) -> Result<ConversionOptions, JobError> {
        let format = match format {
            Some(f) => OutputFormat::from_str(f.trim())
                .map_err(|_| JobError::InvalidOptions(format!("unsupported format '{}'", f)))?,
            None => self.format,
        };
        let quality = match format {
            OutputFormat::Jpeg => Some(quality.unwrap_or(self.jpeg_quality)),
            OutputFormat::Png => None,
        };
        Ok(ConversionOptions {
            format,
            density: density.unwrap_or(self.density),
            quality,
        })
    }
}

/// Result of a start-conversion request.
#[derive(Debug)]
pub enum StartOutcome {
    /// The job moved to `processing` and its batch now runs detached.
    /// Dropping `task` does not cancel the batch.
    Started {
        job: JobRecord,
        task: JoinHandle<JobRecord>,
    },
    /// The job was already `processing` or `completed`; nothing was re-run.
    AlreadyActive(JobRecord),
}

/// Owns job state transitions after submission and drives batch runs.
pub struct BatchOrchestrator {
    store: Arc<JobStore>,
    converter: Arc<dyn ConversionCapability>,
    archiver: Arc<dyn ArchiveBuilder>,
    defaults: ConversionDefaults,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<JobStore>,
        converter: Arc<dyn ConversionCapability>,
        archiver: Arc<dyn ArchiveBuilder>,
        defaults: ConversionDefaults,
    ) -> Self {
        Self {
            store,
            converter,
            archiver,
            defaults,
        }
    }

    pub fn defaults(&self) -> &ConversionDefaults {
        &self.defaults
    }

    pub fn converter(&self) -> &Arc<dyn ConversionCapability> {
        &self.converter
    }

    /// Move an `uploaded` job to `processing` and spawn its batch. Returns as
    /// soon as the transition is stored. Repeated requests for a job that is
    /// already running or finished return its current state.
    pub async fn start_conversion(
        self: &Arc<Self>,
        job_id: Uuid,
        options: ConversionOptions,
    ) -> Result<StartOutcome, JobError> {
        let job = self.store.load(job_id).await?;
        match job.status {
            JobStatus::Processing | JobStatus::Completed => {
                tracing::info!(job_id = %job_id, status = %job.status, "Start requested for active job, ignoring");
                return Ok(StartOutcome::AlreadyActive(job));
            }
            JobStatus::Error => {
                return Err(JobError::PreconditionFailed(format!(
                    "job {} ended in error and cannot be restarted",
                    job_id
                )));
            }
            JobStatus::Uploaded => {}
        }

        let version = self
            .converter
            .check_available()
            .await
            .map_err(|e| JobError::CapabilityUnavailable(e.to_string()))?;
        tracing::info!(job_id = %job_id, version = %version, "Conversion tool available");

        match self.store.begin_processing(job_id, options, Utc::now()).await? {
            BeginOutcome::Unchanged(job) if job.status == JobStatus::Error => {
                Err(JobError::PreconditionFailed(format!(
                    "job {} ended in error and cannot be restarted",
                    job_id
                )))
            }
            BeginOutcome::Unchanged(job) => Ok(StartOutcome::AlreadyActive(job)),
            BeginOutcome::Began(job) => {
                tracing::info!(
                    job_id = %job_id,
                    files = job.files.len(),
                    format = %options.format,
                    density = options.density,
                    "Conversion started"
                );
                let this = Arc::clone(self);
                let record = job.clone();
                let task = tokio::spawn(async move { this.run_batch(record).await });
                Ok(StartOutcome::Started { job, task })
            }
        }
    }

    /// Convert every file of a `processing` job in order, then package the
    /// results. Store write failures are logged and retried at the next save;
    /// the batch only stops early when its job has been purged. The returned
    /// record is the final in-memory state.
    pub async fn run_batch(&self, mut job: JobRecord) -> JobRecord {
        let started = Instant::now();
        let job_id = job.id;
        metrics::gauge!("conversion_jobs_active").increment(1.0);

        let Some(options) = job.options() else {
            return self.finish(job, Err("job has no conversion options".to_string()), started).await;
        };

        if let Err(e) = self.converter.check_available().await {
            tracing::error!(job_id = %job_id, error = %e, "Conversion tool unavailable at batch start");
            return self.finish(job, Err(e.to_string()), started).await;
        }

        let output_dir = self.store.output_dir(job_id);
        let total = job.files.len();

        for (index, file) in job.files.clone().into_iter().enumerate() {
            tracing::info!(job_id = %job_id, file = %file.name, "Converting file {}/{}", index + 1, total);

            let result = match self
                .converter
                .convert(&file.source_path, &output_dir, &options)
                .await
            {
                Ok(outputs) => {
                    metrics::counter!("conversion_files_converted").increment(1);
                    tracing::info!(job_id = %job_id, file = %file.name, pages = outputs.len(), "File converted");
                    FileResult::converted(&file.name, outputs.len())
                }
                Err(e) => {
                    metrics::counter!("conversion_files_failed").increment(1);
                    tracing::warn!(job_id = %job_id, file = %file.name, error = %e, "File conversion failed");
                    FileResult::failed(&file.name, e.to_string())
                }
            };

            if let Err(e) = job.record_result(result) {
                tracing::error!(job_id = %job_id, error = %e, "Could not record file result");
                break;
            }

            tracing::info!(job_id = %job_id, progress = job.progress, "Progress updated");
            match self.store.save(&job).await {
                Ok(()) => {}
                Err(StoreError::NotFound(_)) => return self.abandon(job).await,
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to persist progress, will retry at next file");
                }
            }
        }

        let succeeded = job.success_count();
        tracing::info!(job_id = %job_id, succeeded, total, "Batch finished");

        let outcome = if succeeded == 0 {
            Err(format!("all {} files failed to convert", total))
        } else {
            self.archiver
                .build_archive(&output_dir, &self.store.archive_path(job_id))
                .await
                .map_err(|e| format!("failed to build archive: {}", e))
        };

        self.finish(job, outcome, started).await
    }

    async fn finish(
        &self,
        mut job: JobRecord,
        outcome: Result<PathBuf, String>,
        started: Instant,
    ) -> JobRecord {
        let now = Utc::now();
        let transition = match outcome {
            Ok(archive) => job.complete(archive, now),
            Err(reason) => {
                tracing::error!(job_id = %job.id, reason = %reason, "Job failed");
                job.fail(reason, now)
            }
        };
        if let Err(e) = transition {
            tracing::error!(job_id = %job.id, error = %e, "Illegal terminal transition");
        }

        for attempt in 1..=FINAL_SAVE_ATTEMPTS {
            match self.store.save(&job).await {
                Ok(()) => break,
                Err(StoreError::NotFound(_)) => return self.abandon(job).await,
                Err(e) if attempt < FINAL_SAVE_ATTEMPTS => {
                    tracing::warn!(job_id = %job.id, attempt, error = %e, "Failed to persist final state, retrying");
                    tokio::time::sleep(Duration::from_millis(FINAL_SAVE_BACKOFF_MS * attempt as u64)).await;
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Giving up persisting final state");
                }
            }
        }

        metrics::gauge!("conversion_jobs_active").decrement(1.0);
        metrics::histogram!("conversion_batch_seconds").record(started.elapsed().as_secs_f64());
        match job.status {
            JobStatus::Completed => {
                metrics::counter!("conversion_jobs_completed").increment(1);
                tracing::info!(
                    job_id = %job.id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
            }
            _ => metrics::counter!("conversion_jobs_failed").increment(1),
        }
        job
    }

    /// Stop a batch whose job was purged while it ran. Pages written after the
    /// purge recreated the job directory, so it is removed again.
    async fn abandon(&self, job: JobRecord) -> JobRecord {
        tracing::warn!(job_id = %job.id, progress = job.progress, "Job was purged during its batch, abandoning");
        match self.store.delete(job.id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => tracing::error!(job_id = %job.id, error = %e, "Failed to remove leftovers of purged job"),
        }
        metrics::gauge!("conversion_jobs_active").decrement(1.0);
        job
    }

    /// Fail every job left `processing` by a previous process. Batches only
    /// run inside the process that started them, so none of these can resume.
    pub async fn recover_interrupted(&self, now: DateTime<Utc>) -> Result<usize, JobError> {
        let mut recovered = 0;
        for id in self.store.list_job_ids().await? {
            let mut job = match self.store.load(id).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::debug!(job_id = %id, error = %e, "Skipping unreadable job during recovery");
                    continue;
                }
            };
            if job.status != JobStatus::Processing {
                continue;
            }
            if job.fail("conversion interrupted by service restart", now).is_ok() {
                match self.store.save(&job).await {
                    Ok(()) => {
                        recovered += 1;
                        tracing::warn!(job_id = %id, progress = job.progress, "Marked interrupted job as failed");
                    }
                    Err(e) => tracing::error!(job_id = %id, error = %e, "Failed to mark interrupted job"),
                }
            }
        }
        Ok(recovered)
    }

    /// Location of a completed job's archive.
    pub async fn download(&self, job_id: Uuid) -> Result<PathBuf, JobError> {
        let job = self.store.load(job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(JobError::PreconditionFailed(format!(
                "conversion has not completed (status: {})",
                job.status
            )));
        }
        let path = job.archive_path.ok_or(JobError::ArchiveMissing(job_id))?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(path),
            Ok(false) => Err(JobError::ArchiveMissing(job_id)),
            Err(e) => Err(JobError::Store(StoreError::Io(e))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Conversion capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("Archive for job {0} not found")]
    ArchiveMissing(Uuid),

    #[error("Invalid conversion options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => JobError::NotFound(id),
            other => JobError::Store(other),
        }
    }
}
