// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("task has been shut down: {0}")]
    TaskShutDown(String),

    #[error("work item disappeared for task: {0}")]
    WorkItemVanished(String),

    #[error("work item already has a process attached for task: {0}")]
    ProcessAlreadyAttached(String),

    #[error("port pool exhausted scanning upward from {0}")]
    PortsExhausted(u16),

    #[error("runner is stopping; refusing task: {0}")]
    Stopping(String),

    #[error("restore file listed task {expected} but task.json contains id {actual}")]
    RestoredTaskIdMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
