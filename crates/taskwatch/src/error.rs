use std::io;
use std::time::Duration;

use thiserror::Error;

/// A sampling pass failed as a whole. Individual processes that vanish or
/// deny access mid-scan never produce one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectError {
    #[error("process and system metrics are not supported on this platform")]
    Unsupported,

    #[error("process table unavailable")]
    ProcessTableUnavailable,

    #[error("memory figures unavailable")]
    MemoryUnavailable,

    #[error("collection worker failed: {0}")]
    Worker(String),
}

/// Outcome of a termination request that did not end with the process gone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TerminationError {
    #[error("process not found")]
    NotFound,

    #[error("permission denied (needs sudo)")]
    AccessDenied,

    #[error("no exit observed within {} ms", waited.as_millis())]
    Timeout { waited: Duration },

    #[error("{0}")]
    Unknown(String),
}

impl TerminationError {
    pub fn unknown<S: Into<String>>(msg: S) -> Self {
        TerminationError::Unknown(msg.into())
    }
}

#[derive(Error, Debug)]
pub enum TaskwatchError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, TaskwatchError>;

impl TaskwatchError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        TaskwatchError::Config(msg.into())
    }

    pub fn runtime<S: Into<String>>(msg: S) -> Self {
        TaskwatchError::Runtime(msg.into())
    }
}
