use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::models::job::{ConversionOptions, OutputFormat};

/// Turns one source document into one or more page images.
#[async_trait]
pub trait ConversionCapability: Send + Sync {
    /// Verify the underlying tool can run. Returns its version string.
    async fn check_available(&self) -> Result<String, ConversionError>;

    /// Render `source` into `output_dir`, returning the produced files in page order.
    async fn convert(
        &self,
        source: &Path,
        output_dir: &Path,
        options: &ConversionOptions,
    ) -> Result<Vec<PathBuf>, ConversionError>;
}

/// ImageMagick-backed rasterizer. Invokes the binary directly, never via a shell.
pub struct ImageMagickConverter {
    binary: String,
    timeout: Duration,
}

impl ImageMagickConverter {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[String]) -> Result<std::process::Output, ConversionError> {
        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConversionError::Unavailable(format!("{}: {}", self.binary, e)))?;

        tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ConversionError::TimedOut(self.timeout))?
            .map_err(ConversionError::Io)
    }
}

#[async_trait]
impl ConversionCapability for ImageMagickConverter {
    async fn check_available(&self) -> Result<String, ConversionError> {
        let output = self.run(&["-version".to_string()]).await?;
        if !output.status.success() {
            return Err(ConversionError::Unavailable(format!(
                "{} -version exited with {}",
                self.binary, output.status
            )));
        }
        Ok(parse_version(&String::from_utf8_lossy(&output.stdout))
            .unwrap_or_else(|| "unknown".to_string()))
    }

    async fn convert(
        &self,
        source: &Path,
        output_dir: &Path,
        options: &ConversionOptions,
    ) -> Result<Vec<PathBuf>, ConversionError> {
        tokio::fs::create_dir_all(output_dir).await?;

        let stem = output_stem(source)?;
        let args = build_args(source, output_dir, &stem, options);
        tracing::debug!(binary = %self.binary, ?args, "Running rasterizer");

        let result = match self.run(&args).await {
            Ok(output) if output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    tracing::warn!(source = %source.display(), stderr = %stderr.trim(), "Rasterizer reported warnings");
                }
                let outputs = collect_outputs(output_dir, &stem, options.format).await?;
                if outputs.is_empty() {
                    Err(ConversionError::NoOutput)
                } else {
                    Ok(outputs)
                }
            }
            Ok(output) => Err(ConversionError::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Err(e) => Err(e),
        };

        if result.is_err() {
            remove_partial_outputs(output_dir, &stem, options.format).await;
        }
        result
    }
}

/// Page images are written as `<stem>-000.<ext>`, `<stem>-001.<ext>`, ...
fn output_stem(source: &Path) -> Result<String, ConversionError> {
    source
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConversionError::InvalidSource(source.to_path_buf()))
}

fn build_args(
    source: &Path,
    output_dir: &Path,
    stem: &str,
    options: &ConversionOptions,
) -> Vec<String> {
    let mut args = vec![
        "-density".to_string(),
        options.density.to_string(),
        "-background".to_string(),
        "white".to_string(),
        "-alpha".to_string(),
        "remove".to_string(),
        "-alpha".to_string(),
        "off".to_string(),
    ];

    match options.format {
        OutputFormat::Jpeg => {
            if let Some(quality) = options.quality {
                args.push("-quality".to_string());
                args.push(quality.to_string());
            }
        }
        OutputFormat::Png => {
            args.push("-compress".to_string());
            args.push("zip".to_string());
        }
    }

    let pattern = output_dir.join(format!("{}-%03d.{}", stem, options.format.extension()));
    args.push(source.display().to_string());
    args.push(pattern.display().to_string());
    args
}

/// True for `<stem>-<digits>.<ext>` exactly.
fn is_page_of(file_name: &str, stem: &str, ext: &str) -> bool {
    file_name
        .strip_prefix(stem)
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|rest| rest.strip_suffix(ext))
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

async fn collect_outputs(
    output_dir: &Path,
    stem: &str,
    format: OutputFormat,
) -> Result<Vec<PathBuf>, ConversionError> {
    let mut outputs = Vec::new();
    let mut entries = tokio::fs::read_dir(output_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if let Some(name) = name.to_str() {
            if is_page_of(name, stem, format.extension()) {
                outputs.push(entry.path());
            }
        }
    }
    outputs.sort();
    Ok(outputs)
}

async fn remove_partial_outputs(output_dir: &Path, stem: &str, format: OutputFormat) {
    let Ok(partial) = collect_outputs(output_dir, stem, format).await else {
        return;
    };
    for path in partial {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial output");
        }
    }
}

fn parse_version(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Version: ImageMagick")?;
        rest.split_whitespace().next().map(str::to_string)
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Conversion tool unavailable: {0}")]
    Unavailable(String),

    #[error("Conversion failed (exit code {status:?}): {stderr}")]
    Failed { status: Option<i32>, stderr: String },

    #[error("Conversion timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Conversion produced no output files")]
    NoOutput,

    #[error("Invalid source file name: {0}")]
    InvalidSource(PathBuf),

    #[error("I/O error during conversion: {0}")]
    Io(#[from] std::io::Error),
}
