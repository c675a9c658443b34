//! Error types for the simulacros engine
//!
//! Ingestion-time variants never escape the pipeline boundary: they are turned
//! into an `IngestOutcome` message there. Load-time variants become registry
//! state transitions.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file or value errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("assessment name must not be blank")]
    BlankName,

    #[error("file is {size_bytes} bytes, above the {limit_mb} MB upload limit")]
    FileTooLarge { size_bytes: usize, limit_mb: u64 },

    /// Bytes could not be parsed as a spreadsheet at all
    #[error("could not read the file: {0}")]
    UnreadableFile(String),

    /// Every schema problem found in one validation pass
    #[error("{}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("unknown assessment id '{0}'")]
    UnknownAssessmentId(String),

    /// Backing file of a registered assessment is gone
    #[error("source file not found: {}", .0.display())]
    SourceMissing(PathBuf),

    /// Backing file exists but could not be loaded
    #[error("source failed to load: {0}")]
    SourceFailed(String),

    /// Another writer saved the registry between our read and our write
    #[error("registry changed on disk (expected revision {expected}, found {found})")]
    RegistryConflict { expected: u64, found: u64 },

    /// Registry file exists but does not parse; it is never overwritten
    #[error("registry {} is unreadable and was left untouched: {reason}", .path.display())]
    RegistryUnreadable { path: PathBuf, reason: String },

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
