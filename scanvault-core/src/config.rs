//! Configuration for app settings, SQLite database, S3 bucket, and logging.
//!
//! Settings load from a TOML file named by the `CONFIG_FILE` environment
//! variable, defaulting to `scanvault.toml` in the working directory. S3
//! credentials never live in the file; they come from `S3_KEY`/`S3_SECRET`.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default configuration file path when `CONFIG_FILE` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "scanvault.toml";

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub db: DbConfig,
    pub s3: S3Config,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[app]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Application version reported by the HTTP API.
    pub version: String,
    /// Public URL of the web client.
    pub client_url: String,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_root_path")]
    pub root_path: PathBuf,
    #[serde(default = "default_batch_name")]
    pub batch_name: String,
    /// Megadoc filetypes generated for each search.
    #[serde(default = "default_megadoc_types")]
    pub megadoc_types: Vec<String>,
    /// Cap on concurrently open files across ingest and megadoc tasks.
    #[serde(default = "default_open_file_limit")]
    pub open_file_limit: usize,
    /// Explicit data directory; defaults to `root_path/data`.
    #[serde(default)]
    pub data_path: Option<PathBuf>,
    /// Explicit index directory; defaults to `data_path/batch_name/index`.
    #[serde(default)]
    pub index_path: Option<PathBuf>,
}

/// `[db]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub sql_path: PathBuf,
    /// Retry budget for transient database and upload errors.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Rows per commit during batched ingestion.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// `[s3]` section. Access credentials come from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Full public CDN URL for the bucket.
    pub url: String,
    /// S3 service endpoint.
    pub endpoint: String,
    pub region: String,
    /// Bucket name.
    pub space: String,
}

impl S3Config {
    pub fn access_key(&self) -> Result<String> {
        env::var("S3_KEY").map_err(|_| Error::Config("S3_KEY not set in environment".into()))
    }

    pub fn secret_key(&self) -> Result<String> {
        env::var("S3_SECRET").map_err(|_| Error::Config("S3_SECRET not set in environment".into()))
    }
}

/// `[logging]` section, passed through to `logging::init_logging`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_filename")]
    pub filename: String,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            filename: default_log_filename(),
            level: default_log_level(),
        }
    }
}

fn default_app_name() -> String {
    "scanvault".into()
}

fn default_root_path() -> PathBuf {
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_batch_name() -> String {
    "00".into()
}

fn default_megadoc_types() -> Vec<String> {
    vec![".txt".into(), ".docx".into()]
}

fn default_open_file_limit() -> usize {
    128
}

fn default_retries() -> u32 {
    10
}

fn default_batch_size() -> usize {
    10_000
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_filename() -> String {
    "scanvault.log".into()
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from `CONFIG_FILE` or the default location.
    pub fn load() -> Result<Self> {
        let path = env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Self::load_from(Path::new(&path))
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("could not read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("could not parse {}: {e}", path.display())))
    }

    /// **Absolute** path to the directory where data files are stored.
    pub fn data_path(&self) -> PathBuf {
        self.app
            .data_path
            .clone()
            .unwrap_or_else(|| self.app.root_path.join("data"))
    }

    /// **Absolute** path to the full-text index for the current batch.
    pub fn index_path(&self) -> PathBuf {
        self.app
            .index_path
            .clone()
            .unwrap_or_else(|| self.data_path().join(&self.app.batch_name).join("index"))
    }

    /// **Relative** path to the megadocs for the current batch.
    pub fn megadoc_path(&self) -> PathBuf {
        PathBuf::from(&self.app.batch_name).join("megadocs")
    }
}
