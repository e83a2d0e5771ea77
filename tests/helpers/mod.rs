//! Test helper utilities shared by the integration and E2E suites
#![allow(dead_code)]

use async_trait::async_trait;
use pdf_batch_convert::{
    app_state::AppState,
    models::job::{ConversionOptions, JobRecord},
    routes,
    services::{
        archive::{ArchiveBuilder, ArchiveError, ZipArchiveBuilder},
        converter::{ConversionCapability, ConversionError},
        orchestrator::{BatchOrchestrator, ConversionDefaults},
        submission::UploadedFile,
        sweeper::RetentionSweeper,
    },
    store::JobStore,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// Minimal bytes that pass PDF upload validation.
pub const FAKE_PDF: &[u8] = b"%PDF-1.4\n1 0 obj << >> endobj\n%%EOF\n";

/// Called at the start of each conversion with the call index and output directory.
pub type ConvertHook = Box<dyn Fn(usize, &Path) + Send + Sync>;

/// In-process stand-in for the rasterizer. Writes `pages` dummy images per file
/// and fails for configured file names.
pub struct FakeConverter {
    hook: Option<ConvertHook>,
    available: AtomicBool,
    failing: HashSet<String>,
    pages: usize,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeConverter {
    pub fn new() -> Self {
        Self {
            hook: None,
            available: AtomicBool::new(true),
            failing: HashSet::new(),
            pages: 2,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, names: &[&str]) -> Self {
        self.failing = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_hook(mut self, hook: impl Fn(usize, &Path) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversionCapability for FakeConverter {
    async fn check_available(&self) -> Result<String, ConversionError> {
        if self.available.load(Ordering::SeqCst) {
            Ok("fake-1.0".to_string())
        } else {
            Err(ConversionError::Unavailable("fake rasterizer switched off".to_string()))
        }
    }

    async fn convert(
        &self,
        source: &Path,
        output_dir: &Path,
        options: &ConversionOptions,
    ) -> Result<Vec<PathBuf>, ConversionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.hook {
            hook(call, output_dir);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let name = source.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let result = if self.failing.contains(name) {
            Err(ConversionError::Failed {
                status: Some(1),
                stderr: format!("{}: no decode delegate", name),
            })
        } else {
            let stem = source.file_stem().and_then(|s| s.to_str()).unwrap_or("page");
            tokio::fs::create_dir_all(output_dir).await?;
            let mut outputs = Vec::new();
            for page in 0..self.pages {
                let path = output_dir.join(format!(
                    "{}-{:03}.{}",
                    stem,
                    page,
                    options.format.extension()
                ));
                tokio::fs::write(&path, format!("{} page {}", stem, page)).await?;
                outputs.push(path);
            }
            Ok(outputs)
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Make the job's record unwritable by putting a directory where `job.json`
/// lives. Takes the converter's output directory; returns the displaced record.
pub fn block_record(output_dir: &Path) -> Vec<u8> {
    let record = output_dir.parent().expect("output dir has a job dir").join("job.json");
    let data = std::fs::read(&record).expect("record is readable");
    std::fs::remove_file(&record).expect("remove record");
    std::fs::create_dir(&record).expect("block record path");
    data
}

/// Undo [`block_record`].
pub fn restore_record(output_dir: &Path, data: &[u8]) {
    let record = output_dir.parent().expect("output dir has a job dir").join("job.json");
    std::fs::remove_dir(&record).expect("unblock record path");
    std::fs::write(&record, data).expect("restore record");
}

/// Archive builder that always fails.
pub struct FailingArchiver;

#[async_trait]
impl ArchiveBuilder for FailingArchiver {
    async fn build_archive(&self, _source: &Path, _dest: &Path) -> Result<PathBuf, ArchiveError> {
        Err(ArchiveError::Io(std::io::Error::other("disk full")))
    }
}

/// Store, orchestrator and fake converter over a temporary data directory.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<JobStore>,
    pub converter: Arc<FakeConverter>,
    pub orchestrator: Arc<BatchOrchestrator>,
}

impl Harness {
    pub fn new(converter: FakeConverter) -> Self {
        Self::with_archiver(converter, Arc::new(ZipArchiveBuilder))
    }

    pub fn with_archiver(converter: FakeConverter, archiver: Arc<dyn ArchiveBuilder>) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = Arc::new(JobStore::new(dir.path()));
        let converter = Arc::new(converter);
        let orchestrator = Arc::new(BatchOrchestrator::new(
            store.clone(),
            converter.clone(),
            archiver,
            ConversionDefaults::default(),
        ));
        Self {
            dir,
            store,
            converter,
            orchestrator,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            orchestrator: self.orchestrator.clone(),
            sweeper: Arc::new(RetentionSweeper::new(
                self.store.clone(),
                chrono::Duration::days(2),
            )),
        }
    }

    pub fn png(&self) -> ConversionOptions {
        self.orchestrator
            .defaults()
            .resolve(Some("png"), None, None)
            .expect("png is supported")
    }
}

pub fn pdf_upload(name: &str) -> UploadedFile {
    UploadedFile {
        file_name: name.to_string(),
        content_type: Some("application/pdf".to_string()),
        data: FAKE_PDF.to_vec(),
    }
}

/// Poll the store until the job reaches a terminal state (with timeout)
pub async fn wait_for_terminal(store: &JobStore, job_id: Uuid, timeout: Duration) -> JobRecord {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = store.load(job_id).await.expect("Job should be readable");
        if job.status.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "Job {} did not finish within {:?} (status {})",
            job_id,
            timeout,
            job.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Serve the API on an ephemeral local port and return its base URL.
pub async fn spawn_server(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Listener has no address");

    tokio::spawn(async move {
        axum::serve(listener, routes::router(state))
            .await
            .expect("Test server failed");
    });

    format!("http://{}", addr)
}

/// Upload files to POST /api/v1/upload
pub async fn upload_files(
    client: &reqwest::Client,
    base_url: &str,
    files: &[(&str, &str, &[u8])],
) -> reqwest::Response {
    let mut form = reqwest::multipart::Form::new();
    for (name, mime, bytes) in files {
        form = form.part(
            "files",
            reqwest::multipart::Part::bytes(bytes.to_vec())
                .file_name(name.to_string())
                .mime_str(mime)
                .expect("valid mime type"),
        );
    }

    client
        .post(format!("{}/api/v1/upload", base_url))
        .multipart(form)
        .send()
        .await
        .expect("Upload request failed")
}

/// Poll GET /api/v1/status/{job_id} until completed or error (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: &str,
    timeout: Duration,
) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let body: serde_json::Value = client
            .get(format!("{}/api/v1/status/{}", base_url, job_id))
            .send()
            .await
            .expect("Status request failed")
            .json()
            .await
            .expect("Status body is JSON");

        match body["status"].as_str() {
            Some("completed") | Some("error") => return body,
            _ => {
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "Job {} did not finish in time: {}",
                    job_id,
                    body
                );
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
}
