use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::job::OutputFormat;
use crate::services::orchestrator::ConversionDefaults;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Root directory of the job store; one subdirectory per job.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Jobs older than this many days are purged.
    #[serde(default = "default_retention_days")]
    pub pdf_retention_days: u32,

    /// Run the periodic retention sweeper inside the server.
    #[serde(default = "default_true")]
    pub enable_cleanup: bool,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// ImageMagick executable (`convert` for IM6, `magick` for IM7).
    #[serde(default = "default_imagemagick_binary")]
    pub imagemagick_binary: String,

    /// Default rendering density in DPI.
    #[serde(default = "default_render_density")]
    pub render_density: u32,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Per-file rasterizer timeout.
    #[serde(default = "default_convert_timeout_secs")]
    pub convert_timeout_secs: u64,

    /// Request body limit for uploads, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_retention_days() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_cleanup_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_imagemagick_binary() -> String {
    "convert".to_string()
}

fn default_render_density() -> u32 {
    300
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_convert_timeout_secs() -> u64 {
    300
}

fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.pdf_retention_days))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn convert_timeout(&self) -> Duration {
        Duration::from_secs(self.convert_timeout_secs)
    }

    pub fn conversion_defaults(&self) -> ConversionDefaults {
        ConversionDefaults {
            format: OutputFormat::Png,
            density: self.render_density,
            jpeg_quality: self.jpeg_quality,
        }
    }
}
