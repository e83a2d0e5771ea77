use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

use crate::models::job::{JobFile, JobRecord};
use crate::store::{JobStore, StoreError};

/// Names inside a job directory that uploads may not take.
const RESERVED_NAMES: &[&str] = &["job.json", "output", "converted_images.zip"];

/// One file received from a client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Stage a batch of uploads and create its job record in the `uploaded` state.
/// Nothing is left behind if any file is rejected.
pub async fn submit(store: &JobStore, uploads: Vec<UploadedFile>) -> Result<JobRecord, SubmissionError> {
    if uploads.is_empty() {
        return Err(SubmissionError::Empty);
    }

    for upload in &uploads {
        if !is_pdf(upload) {
            return Err(SubmissionError::NotPdf(upload.file_name.clone()));
        }
    }

    let id = Uuid::new_v4();
    match stage(store, id, uploads).await {
        Ok(job) => {
            metrics::counter!("conversion_jobs_submitted").increment(1);
            tracing::info!(job_id = %id, files = job.files.len(), "Batch uploaded");
            Ok(job)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_dir_all(store.job_dir(id)).await {
                tracing::debug!(job_id = %id, error = %cleanup, "Nothing to clean up after failed upload");
            }
            Err(e)
        }
    }
}

async fn stage(store: &JobStore, id: Uuid, uploads: Vec<UploadedFile>) -> Result<JobRecord, SubmissionError> {
    let mut taken = HashSet::new();
    let mut files = Vec::with_capacity(uploads.len());

    for upload in uploads {
        let name = sanitize_file_name(&upload.file_name)
            .ok_or_else(|| SubmissionError::InvalidName(upload.file_name.clone()))?;
        let name = unique_name(&name, &mut taken);
        let source_path = store.stage_file(id, &name, &upload.data).await?;
        files.push(JobFile {
            name,
            size: upload.data.len() as u64,
            source_path,
        });
    }

    let job = JobRecord::new(id, files, Utc::now());
    store.create(&job).await?;
    Ok(job)
}

fn is_pdf(upload: &UploadedFile) -> bool {
    upload.data.starts_with(b"%PDF-")
        || upload
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.eq_ignore_ascii_case("application/pdf"))
}

/// Keep only the final path component of a client-supplied name.
fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty()
        || name.starts_with('.')
        || name.chars().any(char::is_control)
        || RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name))
    {
        return None;
    }
    Some(name.to_string())
}

/// Page images are named after the file stem, so stems must be unique per batch.
fn unique_name(name: &str, taken: &mut HashSet<String>) -> String {
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    let mut candidate_stem = stem.to_string();
    let mut n = 1;
    while !taken.insert(candidate_stem.to_lowercase()) {
        n += 1;
        candidate_stem = format!("{}_{}", stem, n);
    }
    format!("{}{}", candidate_stem, ext)
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("No PDF files were uploaded")]
    Empty,

    #[error("{0} is not a PDF file")]
    NotPdf(String),

    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;

    fn pdf(name: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            content_type: None,
            data: b"%PDF-1.4\n%fake\n".to_vec(),
        }
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(sanitize_file_name("../../etc/passwd.pdf").as_deref(), Some("passwd.pdf"));
        assert_eq!(sanitize_file_name("C:\\docs\\a.pdf").as_deref(), Some("a.pdf"));
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("dir/"), None);
        assert_eq!(sanitize_file_name("job.json"), None);
    }

    #[test]
    fn test_unique_name_dedupes_stems() {
        let mut taken = HashSet::new();
        assert_eq!(unique_name("a.pdf", &mut taken), "a.pdf");
        assert_eq!(unique_name("A.PDF", &mut taken), "A_2.PDF");
        assert_eq!(unique_name("a.pdf", &mut taken), "a_3.pdf");
        assert_eq!(unique_name("b.pdf", &mut taken), "b.pdf");
    }

    #[test]
    fn test_pdf_detection() {
        assert!(is_pdf(&pdf("a.pdf")));
        let by_type = UploadedFile {
            file_name: "broken.pdf".to_string(),
            content_type: Some("application/pdf".to_string()),
            data: b"garbage".to_vec(),
        };
        assert!(is_pdf(&by_type));
        let text = UploadedFile {
            file_name: "notes.txt".to_string(),
            content_type: Some("text/plain".to_string()),
            data: b"hello".to_vec(),
        };
        assert!(!is_pdf(&text));
    }

    #[tokio::test]
    async fn test_submit_creates_uploaded_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());

        let job = submit(&store, vec![pdf("a.pdf"), pdf("b.pdf")]).await.unwrap();
        assert_eq!(job.status, JobStatus::Uploaded);
        assert_eq!(job.progress, 0);
        let names: Vec<_> = job.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.pdf", "b.pdf"]);
        assert!(job.files.iter().all(|f| f.source_path.exists()));

        assert_eq!(store.load(job.id).await.unwrap(), job);
    }

    #[tokio::test]
    async fn test_rejected_batch_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());

        assert!(matches!(submit(&store, vec![]).await, Err(SubmissionError::Empty)));

        let bad = UploadedFile {
            file_name: "notes.txt".to_string(),
            content_type: Some("text/plain".to_string()),
            data: b"hello".to_vec(),
        };
        assert!(matches!(
            submit(&store, vec![pdf("a.pdf"), bad]).await,
            Err(SubmissionError::NotPdf(name)) if name == "notes.txt"
        ));

        assert!(matches!(
            submit(&store, vec![pdf("a.pdf"), pdf("job.json")]).await,
            Err(SubmissionError::InvalidName(_))
        ));
        assert!(store.list_job_ids().await.unwrap().is_empty());
    }
}
