//! Error taxonomy for the recording store
//!
//! Structural failures (root or target directory missing) are returned as
//! [`RecordError`] and abort the operation. Per-file failures during a walk or
//! a sweep are recorded as [`IoFailure`] values and never abort the sweep.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Errors that abort a whole operation
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("recording root does not exist: {}", .0.display())]
    RootMissing(PathBuf),

    #[error("path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("directory does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid path component '{0}'")]
    InvalidComponent(String),

    #[error("invalid retention policy: {0}")]
    InvalidPolicy(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RecordError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type RecordResult<T> = Result<T, RecordError>;

/// Filesystem operation that failed for a single entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IoOp {
    ReadDir,
    Stat,
    Delete,
}

impl IoOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            IoOp::ReadDir => "read_dir",
            IoOp::Stat => "stat",
            IoOp::Delete => "delete",
        }
    }
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A non-fatal failure on one file or directory
#[derive(Debug, Clone, Serialize)]
pub struct IoFailure {
    pub path: PathBuf,
    pub op: IoOp,
    pub message: String,
}

impl IoFailure {
    pub fn new(path: &Path, op: IoOp, err: impl fmt::Display) -> Self {
        Self {
            path: path.to_path_buf(),
            op,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for IoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed for {}: {}", self.op, self.path.display(), self.message)
    }
}
