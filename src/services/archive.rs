use async_trait::async_trait;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Packages a directory of rendered pages into one downloadable artifact.
#[async_trait]
pub trait ArchiveBuilder: Send + Sync {
    async fn build_archive(
        &self,
        source_dir: &Path,
        destination: &Path,
    ) -> Result<PathBuf, ArchiveError>;
}

/// Writes a flat, deflate-compressed ZIP of every regular file in a directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipArchiveBuilder;

#[async_trait]
impl ArchiveBuilder for ZipArchiveBuilder {
    async fn build_archive(
        &self,
        source_dir: &Path,
        destination: &Path,
    ) -> Result<PathBuf, ArchiveError> {
        let source_dir = source_dir.to_path_buf();
        let destination = destination.to_path_buf();

        tokio::task::spawn_blocking(move || write_zip(&source_dir, &destination))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))?
    }
}

fn write_zip(source_dir: &Path, destination: &Path) -> Result<PathBuf, ArchiveError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(source_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(ArchiveError::Empty(source_dir.to_path_buf()));
    }

    let tmp = destination.with_extension("zip.partial");
    let result = (|| -> Result<(), ArchiveError> {
        let mut zip = ZipWriter::new(BufWriter::new(File::create(&tmp)?));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for path in &files {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| ArchiveError::InvalidName(path.clone()))?;
            zip.start_file(name, options)?;
            let mut source = File::open(path)?;
            std::io::copy(&mut source, &mut zip)?;
        }

        let mut writer = zip.finish()?;
        writer.flush()?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            std::fs::rename(&tmp, destination)?;
            tracing::info!(
                archive = %destination.display(),
                entries = files.len(),
                "Archive written"
            );
            Ok(destination.to_path_buf())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Nothing to archive in {0}")]
    Empty(PathBuf),

    #[error("Non UTF-8 file name: {0}")]
    InvalidName(PathBuf),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive task failed: {0}")]
    Task(String),
}
