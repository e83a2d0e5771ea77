use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Status of a conversion job. Only ever moves forward:
/// `uploaded -> processing -> {completed, error}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Uploaded,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// Image format produced by the rasterizer.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    Png,
    #[strum(to_string = "jpeg", serialize = "jpg")]
    #[serde(alias = "jpg")]
    Jpeg,
}

impl OutputFormat {
    /// File extension used for rendered pages.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
        }
    }
}

/// An uploaded source document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFile {
    pub name: String,
    pub size: u64,
    pub source_path: PathBuf,
}

/// Outcome of converting one file of the batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileResult {
    pub file_name: String,
    pub success: bool,
    pub output_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl FileResult {
    pub fn converted(file_name: impl Into<String>, output_count: usize) -> Self {
        Self {
            file_name: file_name.into(),
            success: true,
            output_count,
            error_reason: None,
        }
    }

    pub fn failed(file_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            success: false,
            output_count: 0,
            error_reason: Some(reason.into()),
        }
    }
}

/// Rendering options fixed when a conversion starts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConversionOptions {
    pub format: OutputFormat,
    pub density: u32,
    /// Only applied to JPEG output.
    pub quality: Option<u8>,
}

/// The persisted record of one batch conversion job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: Uuid,
    pub status: JobStatus,
    pub files: Vec<JobFile>,
    #[serde(default)]
    pub format: Option<OutputFormat>,
    #[serde(default)]
    pub density: Option<u32>,
    #[serde(default)]
    pub quality: Option<u8>,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub results: Vec<FileResult>,
    #[serde(default)]
    pub archive_path: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot move job from {from} to {to}")]
    Illegal { from: JobStatus, to: JobStatus },

    #[error("job already has a result for every file")]
    ResultsFull,

    #[error("result for {got} does not match next file {expected}")]
    OutOfOrder { expected: String, got: String },
}

impl JobRecord {
    /// A freshly submitted job in the `uploaded` state.
    pub fn new(id: Uuid, files: Vec<JobFile>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Uploaded,
            files,
            format: None,
            density: None,
            quality: None,
            progress: 0,
            created_at,
            started_at: None,
            completed_at: None,
            results: Vec::new(),
            archive_path: None,
            error: None,
        }
    }

    /// Options recorded by [`JobRecord::begin`], if the job has started.
    pub fn options(&self) -> Option<ConversionOptions> {
        Some(ConversionOptions {
            format: self.format?,
            density: self.density?,
            quality: self.quality,
        })
    }

    /// `uploaded -> processing`.
    pub fn begin(
        &mut self,
        options: ConversionOptions,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require(JobStatus::Uploaded, JobStatus::Processing)?;
        self.status = JobStatus::Processing;
        self.format = Some(options.format);
        self.density = Some(options.density);
        self.quality = options.quality;
        self.started_at = Some(now);
        self.progress = 0;
        Ok(())
    }

    /// Append the next file's outcome and recompute progress.
    pub fn record_result(&mut self, result: FileResult) -> Result<(), TransitionError> {
        self.require(JobStatus::Processing, JobStatus::Processing)?;
        let next = self
            .files
            .get(self.results.len())
            .ok_or(TransitionError::ResultsFull)?;
        if next.name != result.file_name {
            return Err(TransitionError::OutOfOrder {
                expected: next.name.clone(),
                got: result.file_name,
            });
        }
        self.results.push(result);
        self.progress = self.progress.max(progress_percent(self.results.len(), self.files.len()));
        Ok(())
    }

    /// `processing -> completed`.
    pub fn complete(
        &mut self,
        archive_path: PathBuf,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require(JobStatus::Processing, JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.archive_path = Some(archive_path);
        self.completed_at = Some(now);
        Ok(())
    }

    /// `processing -> error`. Progress is left where the batch stopped.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require(JobStatus::Processing, JobStatus::Error)?;
        self.status = JobStatus::Error;
        self.error = Some(reason.into());
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// Check the record's structural invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.progress > 100 {
            return Err(format!("progress {} out of range", self.progress));
        }
        if self.results.len() > self.files.len() {
            return Err(format!(
                "{} results for {} files",
                self.results.len(),
                self.files.len()
            ));
        }
        for (result, file) in self.results.iter().zip(&self.files) {
            if result.file_name != file.name {
                return Err(format!(
                    "result for {} recorded against file {}",
                    result.file_name, file.name
                ));
            }
        }
        if self.archive_path.is_some() != (self.status == JobStatus::Completed) {
            return Err(format!(
                "archive path {} in status {}",
                if self.archive_path.is_some() { "present" } else { "missing" },
                self.status
            ));
        }
        if self.error.is_some() && self.status != JobStatus::Error {
            return Err(format!("error reason present in status {}", self.status));
        }
        match self.status {
            JobStatus::Uploaded => {
                if self.started_at.is_some() || !self.results.is_empty() {
                    return Err("uploaded job has already started".to_string());
                }
            }
            JobStatus::Processing => {
                if self.format.is_none() || self.started_at.is_none() {
                    return Err("processing job without format or start time".to_string());
                }
            }
            JobStatus::Completed => {
                if self.progress != 100 {
                    return Err(format!("completed job at {}%", self.progress));
                }
            }
            JobStatus::Error => {}
        }
        Ok(())
    }

    fn require(&self, from: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
        if self.status == from {
            Ok(())
        } else {
            Err(TransitionError::Illegal {
                from: self.status,
                to,
            })
        }
    }
}

/// `round(100 * done / total)`, with an empty batch counting as done.
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = done.min(total);
    ((done * 200 + total) / (total * 2)) as u8
}
