// src/logs.rs

//! Task-log plumbing: positional file streaming and the log-upload seam.
//!
//! The runner talks to a [`TaskLogPusher`] instead of a concrete uploader.
//! Production implementations ship the log file to durable storage; tests
//! can record the calls instead. Same idea as the executor-backend seam in
//! the exec layer.

use std::fs::File;
use std::future::Future;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;

use crate::errors::Result;

/// Destination for completed task logs.
///
/// Called by the supervisor once per attempt, after the child has exited and
/// before its status is resolved, on success and failure alike.
pub trait TaskLogPusher: Send + Sync {
    fn push_task_log<'a>(
        &'a self,
        task_id: &'a str,
        log_file: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Open `path` for reading, positioned according to `offset`:
///
/// - `offset >= 0`: start at that byte (seeking past EOF just reads empty).
/// - `offset < 0`: start `|offset|` bytes before the end, clamped to the
///   start of the file ("last N bytes").
pub fn stream_file(path: &Path, offset: i64) -> std::io::Result<File> {
    let mut file = File::open(path)?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset as u64))?;
    } else if offset < 0 {
        let len = file.metadata()?.len() as i64;
        let position = std::cmp::max(0, len + offset);
        file.seek(SeekFrom::Start(position as u64))?;
    }
    Ok(file)
}

/// Deferred reader over a live task's log file.
///
/// Handed out by `stream_task_log` while the task's process holder is
/// attached; nothing is opened until [`open`](TaskLogStream::open) is called.
#[derive(Debug, Clone)]
pub struct TaskLogStream {
    log_file: PathBuf,
    offset: i64,
}

impl TaskLogStream {
    pub(crate) fn new(log_file: PathBuf, offset: i64) -> Self {
        Self { log_file, offset }
    }

    pub fn path(&self) -> &Path {
        &self.log_file
    }

    pub fn open(&self) -> std::io::Result<File> {
        stream_file(&self.log_file, self.offset)
    }
}
