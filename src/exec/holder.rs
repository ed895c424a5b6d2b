// src/exec/holder.rs

//! Per-task bookkeeping: the live process binding and the work item.
//!
//! The child process itself stays owned by its supervisor activation; what
//! the runner's table holds is the *control surface*: the child's stdin
//! handle (closed during process-wide stop) and a one-shot kill trigger the
//! supervisor listens on. Destroying through the trigger is idempotent, so
//! per-task shutdown, process-wide stop and supervisor cleanup can all fire
//! it without coordinating.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::process::ChildStdin;
use tokio::sync::oneshot;

use crate::task::{Task, TaskStatus};

/// Completion handle returned by `run`; clones all resolve to the same
/// status, so idempotent resubmission hands out the original future.
pub type TaskCompletion = Shared<BoxFuture<'static, TaskStatus>>;

/// Live binding of a spawned child to its log file and primary port.
#[derive(Debug)]
pub struct ProcessHolder {
    pid: Option<u32>,
    log_file: PathBuf,
    port: u16,
    stdin: Mutex<Option<ChildStdin>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProcessHolder {
    pub(crate) fn new(
        pid: Option<u32>,
        stdin: Option<ChildStdin>,
        log_file: PathBuf,
        port: u16,
        kill: oneshot::Sender<()>,
    ) -> Self {
        Self {
            pid,
            log_file,
            port,
            stdin: Mutex::new(stdin),
            kill: Mutex::new(Some(kill)),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Ask the supervising activation to kill the child. Idempotent; once the
    /// supervisor has gone away this is a no-op.
    pub fn destroy(&self) {
        if let Some(kill) = self.kill.lock().take() {
            let _ = kill.send(());
        }
    }

    /// Close the child's stdin, signalling it to finish up. Children
    /// interpret EOF on stdin as the start of graceful shutdown.
    pub fn close_stdin(&self) {
        drop(self.stdin.lock().take());
    }
}

/// The runner's per-task record, from submission until supervisor cleanup.
pub struct WorkItem {
    pub(crate) task: Task,
    completion: TaskCompletion,

    /// Set once and never cleared; observed by the supervisor before spawn.
    pub(crate) shutdown: bool,

    /// Present exactly while a child is spawned: the pending/running
    /// classification hinges on this field.
    pub(crate) process_holder: Option<Arc<ProcessHolder>>,
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("task", &self.task.id)
            .field("shutdown", &self.shutdown)
            .field("running", &self.process_holder.is_some())
            .finish_non_exhaustive()
    }
}

impl WorkItem {
    pub(crate) fn new(task: Task, completion: TaskCompletion) -> Self {
        Self {
            task,
            completion,
            shutdown: false,
            process_holder: None,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn completion(&self) -> TaskCompletion {
        self.completion.clone()
    }

    pub fn is_running(&self) -> bool {
        self.process_holder.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn destroy_fires_the_kill_channel_once() {
        let (kill_tx, mut kill_rx) = oneshot::channel();
        let holder = ProcessHolder::new(None, None, PathBuf::from("/tmp/log"), 8100, kill_tx);

        // Per-task shutdown, process-wide stop and supervisor cleanup may all
        // call destroy; only the first send reaches the supervisor.
        holder.destroy();
        holder.destroy();
        holder.destroy();

        assert!(matches!(kill_rx.try_recv(), Ok(())));
    }

    #[test]
    fn close_stdin_tolerates_missing_handle() {
        let (kill_tx, _kill_rx) = oneshot::channel();
        let holder = ProcessHolder::new(None, None, PathBuf::from("/tmp/log"), 8100, kill_tx);

        holder.close_stdin();
        holder.close_stdin();
    }
}
