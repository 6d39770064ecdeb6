//! Typed failures for configuration, tracking persistence and external steps.

use std::path::PathBuf;
use thiserror::Error;

/// A batch cannot start until these are fixed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no template selected (use --template)")]
    MissingTemplate,
    #[error("template not found: {0}")]
    TemplateNotFound(PathBuf),
    #[error("recipient source not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("recipient source has no data rows: {0}")]
    EmptySource(PathBuf),
    #[error("no sender address given (use --from)")]
    MissingSender,
    #[error("column {column:?} not found; available columns: {available}")]
    MissingColumn { column: String, available: String },
    #[error("placeholder {0:?} is not mapped to a column (use --map {0}=<Column>)")]
    UnmappedPlaceholder(String),
    #[error("invalid mapping {0:?}, expected placeholder=Column")]
    InvalidMapping(String),
    #[error("--render-command is empty")]
    EmptyCommand,
    #[error("delimiter must be a single ASCII character, got {0:?}")]
    InvalidDelimiter(char),
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize tracking records: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to back up unreadable tracking file to {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of one external step for one item.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{program} is not available (is it installed and on PATH?)")]
    Unavailable { program: String },
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with status {code}{detail}")]
    Exited {
        program: String,
        code: i32,
        detail: String,
    },
    #[error("expected output was not produced: {0}")]
    MissingOutput(PathBuf),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StepError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StepError::Io {
            context: context.into(),
            source,
        }
    }
}
