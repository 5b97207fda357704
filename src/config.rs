use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::IngestError;
use crate::sqlite::SqliteStoreConfig;
use crate::upload::{DEFAULT_CHUNK_SIZE, UploadOptions};
use crate::verify::{DEFAULT_SAMPLE_SIZE, VerifyOptions};

pub const DEFAULT_CONFIG_FILE: &str = "genomic-ingest.json";
pub const DEFAULT_STORE_PATH: &str = "genomic_data.sqlite3";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_POOL_SIZE: usize = 4;
pub const DEFAULT_BACKUP_DIR: &str = "backups";
pub const DEFAULT_QC_DIR: &str = "qc_reports";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub upload: UploadSection,
    #[serde(default)]
    pub verify: VerifySection,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StoreSection {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
    #[serde(default)]
    pub pool_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UploadSection {
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct VerifySection {
    #[serde(default)]
    pub sample_size: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct OutputSection {
    #[serde(default)]
    pub backup_dir: Option<String>,
    #[serde(default)]
    pub qc_dir: Option<String>,
    #[serde(default)]
    pub summary_file: Option<String>,
}

/// Command-line values; each one set wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub chunk_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub sample_size: Option<usize>,
    pub backup_dir: Option<Utf8PathBuf>,
    pub qc_dir: Option<Utf8PathBuf>,
    pub summary_file: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub store: SqliteStoreConfig,
    pub upload: UploadOptions,
    pub verify: VerifyOptions,
    pub backup_dir: Utf8PathBuf,
    pub qc_dir: Utf8PathBuf,
    pub summary_file: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>, overrides: &Overrides) -> Result<ResolvedConfig, IngestError> {
        let config = Self::load(path)?;
        Self::resolve_config(config, overrides)
    }

    /// Reads the config file. Only the implicit default file may be absent.
    pub fn load(path: Option<&str>) -> Result<Config, IngestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            warn!(
                path = %config_path.display(),
                "config file not found, using default configuration"
            );
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| IngestError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| IngestError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config, overrides: &Overrides) -> Result<ResolvedConfig, IngestError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let chunk_size = overrides
            .chunk_size
            .or(config.upload.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        let concurrency = overrides
            .concurrency
            .or(config.upload.concurrency)
            .unwrap_or_else(num_cpus::get);
        let pool_size = config.store.pool_size.unwrap_or(DEFAULT_POOL_SIZE);
        let sample_size = overrides
            .sample_size
            .or(config.verify.sample_size)
            .unwrap_or(DEFAULT_SAMPLE_SIZE);

        for (name, value) in [
            ("chunk_size", chunk_size),
            ("concurrency", concurrency),
            ("pool_size", pool_size),
        ] {
            if value == 0 {
                return Err(IngestError::InvalidConfig(format!(
                    "{name} must be at least 1"
                )));
            }
        }

        let store_path = config
            .store
            .path
            .unwrap_or_else(|| DEFAULT_STORE_PATH.to_string());
        if store_path.trim().is_empty() {
            return Err(IngestError::InvalidConfig(
                "store path must not be empty".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            store: SqliteStoreConfig {
                path: Utf8PathBuf::from(store_path),
                busy_timeout_ms: config
                    .store
                    .busy_timeout_ms
                    .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
                pool_size,
            },
            upload: UploadOptions {
                chunk_size,
                concurrency,
            },
            verify: VerifyOptions {
                sample_size,
                seed: config.verify.seed,
            },
            backup_dir: overrides.backup_dir.clone().unwrap_or_else(|| {
                Utf8PathBuf::from(
                    config
                        .output
                        .backup_dir
                        .unwrap_or_else(|| DEFAULT_BACKUP_DIR.to_string()),
                )
            }),
            qc_dir: overrides.qc_dir.clone().unwrap_or_else(|| {
                Utf8PathBuf::from(
                    config
                        .output
                        .qc_dir
                        .unwrap_or_else(|| DEFAULT_QC_DIR.to_string()),
                )
            }),
            summary_file: overrides
                .summary_file
                .clone()
                .or_else(|| config.output.summary_file.map(Utf8PathBuf::from)),
        })
    }
}
