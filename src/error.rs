use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("unknown table type: {0}")]
    UnknownTableType(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("input directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("invalid file pattern: {0}")]
    InvalidPattern(String),

    #[error("no input files found to process")]
    NoInputFiles,

    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("store rejected write on uniqueness constraint: {0}")]
    StoreConflict(String),

    #[error("schema bootstrap failed for {table}: {message}")]
    SchemaBootstrap { table: String, message: String },

    #[error("backup of {table} failed: {message}")]
    Backup { table: String, message: String },

    #[error("failed to build upload worker pool: {0}")]
    WorkerPool(String),

    #[error("notification failed: {0}")]
    Notify(String),
}
