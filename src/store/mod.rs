use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::job::{ConversionOptions, JobRecord, JobStatus};

const RECORD_FILE: &str = "job.json";
const OUTPUT_DIR: &str = "output";
const ARCHIVE_FILE: &str = "converted_images.zip";

/// Filesystem-backed job store. Each job owns `<root>/<job_id>/`, which holds
/// `job.json`, the uploaded PDFs, rendered pages under `output/` and the
/// packaged archive.
pub struct JobStore {
    root: PathBuf,
    /// Serializes record writes, the start transition and job deletion.
    writes: Mutex<()>,
}

/// Result of [`JobStore::begin_processing`].
#[derive(Debug)]
pub enum BeginOutcome {
    /// The job moved `uploaded -> processing`; the stored record is returned.
    Began(JobRecord),
    /// The job was not `uploaded`; nothing was written.
    Unchanged(JobRecord),
}

impl JobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writes: Mutex::new(()),
        }
    }

    /// Create the root directory if needed.
    pub async fn init(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub fn output_dir(&self, id: Uuid) -> PathBuf {
        self.job_dir(id).join(OUTPUT_DIR)
    }

    pub fn archive_path(&self, id: Uuid) -> PathBuf {
        self.job_dir(id).join(ARCHIVE_FILE)
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.job_dir(id).join(RECORD_FILE)
    }

    /// Write an uploaded payload into the job's namespace, creating it if needed.
    pub async fn stage_file(&self, id: Uuid, name: &str, data: &[u8]) -> Result<PathBuf, StoreError> {
        let dir = self.job_dir(id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(name);
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    /// Persist a new record. Identifiers are never reused.
    pub async fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        let _guard = self.writes.lock().await;
        if tokio::fs::try_exists(self.record_path(record.id)).await? {
            return Err(StoreError::AlreadyExists(record.id));
        }
        tokio::fs::create_dir_all(self.job_dir(record.id)).await?;
        self.write_record(record).await
    }

    /// Load and validate a record.
    pub async fn load(&self, id: Uuid) -> Result<JobRecord, StoreError> {
        let data = match tokio::fs::read(self.record_path(id)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };

        let record: JobRecord = serde_json::from_slice(&data).map_err(|e| StoreError::Corrupt {
            id,
            reason: e.to_string(),
        })?;
        if record.id != id {
            return Err(StoreError::Corrupt {
                id,
                reason: format!("record carries id {}", record.id),
            });
        }
        record
            .validate()
            .map_err(|reason| StoreError::Corrupt { id, reason })?;
        Ok(record)
    }

    /// Replace an existing record. Fails with `NotFound` once the job has been
    /// deleted, even if something has since recreated its directory.
    pub async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        let _guard = self.writes.lock().await;
        if !tokio::fs::try_exists(self.record_path(record.id)).await? {
            return Err(StoreError::NotFound(record.id));
        }
        self.write_record(record).await
    }

    /// Written to a temporary file and renamed into place so a concurrent
    /// `load` sees either the old or the new record.
    async fn write_record(&self, record: &JobRecord) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(record)?;
        let path = self.record_path(record.id);
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));

        tokio::fs::write(&tmp, &json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Compare-and-swap `uploaded -> processing`. Serialized across callers
    /// so two concurrent start requests cannot both begin the same job.
    pub async fn begin_processing(
        &self,
        id: Uuid,
        options: ConversionOptions,
        now: DateTime<Utc>,
    ) -> Result<BeginOutcome, StoreError> {
        let _guard = self.writes.lock().await;

        let mut record = self.load(id).await?;
        if record.status != JobStatus::Uploaded {
            return Ok(BeginOutcome::Unchanged(record));
        }
        record
            .begin(options, now)
            .map_err(|e| StoreError::Corrupt {
                id,
                reason: e.to_string(),
            })?;
        self.write_record(&record).await?;
        Ok(BeginOutcome::Began(record))
    }

    /// Identifiers of every job directory under the root. Entries that are not
    /// job directories are skipped.
    pub async fn list_job_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().to_str().map(Uuid::parse_str) {
                Some(Ok(id)) => ids.push(id),
                _ => tracing::debug!(entry = ?entry.file_name(), "Skipping non-job directory"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Last-modified time of the job directory, for jobs whose record is unreadable.
    pub async fn dir_modified(&self, id: Uuid) -> Result<DateTime<Utc>, StoreError> {
        let meta = tokio::fs::metadata(self.job_dir(id)).await?;
        Ok(meta.modified()?.into())
    }

    /// Remove the record and every file of the job.
    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let _guard = self.writes.lock().await;
        match tokio::fs::remove_dir_all(self.job_dir(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {0} already exists")]
    AlreadyExists(Uuid),

    #[error("Job {id} has an invalid record: {reason}")]
    Corrupt { id: Uuid, reason: String },

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
