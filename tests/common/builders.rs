#![allow(dead_code)]

//! Test builders and fakes for driving a real `ForkingTaskRunner`.
//!
//! The child executable is `bash`: `bash -cp <classpath> ...` consumes `-c`
//! and `-p`, takes the classpath slot as the command string, and every later
//! argv entry becomes a positional parameter. Test peons therefore read the
//! status-file path as `"${@: -1}"` and the task-file path as `"${@: -2:1}"`,
//! which keeps the production argv template intact while running real
//! children.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use forkrun::{
    ForkingConfig, ForkingTaskRunner, NodeConfig, Properties, Task, TaskConfig, TaskLogPusher,
    WorkerConfig,
};

/// Peon that derives its task id from the task-file path, optionally sleeps,
/// then reports success.
pub fn peon_success(sleep: &str) -> String {
    format!(
        r#"TASK_FILE="${{@: -2:1}}"; ID=$(basename "$(dirname "$TASK_FILE")"); sleep {sleep}; echo "{{\"id\":\"$ID\",\"status\":\"SUCCESS\"}}" > "${{@: -1}}""#
    )
}

/// Peon that never writes a status and sleeps until killed.
pub fn peon_sleep_forever() -> String {
    "sleep 300".to_string()
}

/// Peon that exits non-zero without writing a status.
pub fn peon_fail() -> String {
    "exit 3".to_string()
}

/// Peon that consumes stdin until EOF (the graceful-stop signal), then
/// reports success.
pub fn peon_wait_for_stdin_eof() -> String {
    r#"TASK_FILE="${@: -2:1}"; ID=$(basename "$(dirname "$TASK_FILE")"); cat >/dev/null; echo "{\"id\":\"$ID\",\"status\":\"SUCCESS\"}" > "${@: -1}""#
        .to_string()
}

/// Peon that prints a line and then sleeps until killed.
pub fn peon_echo_then_sleep(line: &str) -> String {
    format!("echo {line}; sleep 300")
}

/// Log pusher that records every call instead of uploading.
pub struct RecordingLogPusher {
    pushed: Arc<Mutex<Vec<(String, PathBuf)>>>,
}

impl RecordingLogPusher {
    pub fn new(pushed: Arc<Mutex<Vec<(String, PathBuf)>>>) -> Self {
        Self { pushed }
    }
}

impl TaskLogPusher for RecordingLogPusher {
    fn push_task_log<'a>(
        &'a self,
        task_id: &'a str,
        log_file: &'a Path,
    ) -> Pin<Box<dyn Future<Output = forkrun::Result<()>> + Send + 'a>> {
        let pushed = Arc::clone(&self.pushed);
        let task_id = task_id.to_string();
        let log_file = log_file.to_path_buf();
        Box::pin(async move {
            pushed.lock().unwrap().push((task_id, log_file));
            Ok(())
        })
    }
}

/// Builder for `Task`.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            task: Task {
                id: id.to_string(),
                data_source: "events".to_string(),
                classpath_prefix: None,
                node_type: None,
                context: BTreeMap::new(),
                can_restore: false,
            },
        }
    }

    pub fn data_source(mut self, name: &str) -> Self {
        self.task.data_source = name.to_string();
        self
    }

    pub fn can_restore(mut self, val: bool) -> Self {
        self.task.can_restore = val;
        self
    }

    pub fn context(mut self, key: &str, value: serde_json::Value) -> Self {
        self.task.context.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// A runner wired to a temp base dir, a bash peon and a recording pusher.
pub struct RunnerHarness {
    pub runner: ForkingTaskRunner,
    pub base_dir: PathBuf,
    pub pushed: Arc<Mutex<Vec<(String, PathBuf)>>>,
    _tmp: TempDir,
}

impl RunnerHarness {
    pub fn pushed_ids(&self) -> Vec<String> {
        self.pushed
            .lock()
            .unwrap()
            .iter()
            .map(|(task_id, _)| task_id.clone())
            .collect()
    }

    pub fn restore_file_contents(&self) -> String {
        std::fs::read_to_string(self.base_dir.join("restore.json")).unwrap_or_default()
    }
}

/// Builder for `RunnerHarness`.
pub struct RunnerBuilder {
    script: String,
    capacity: usize,
    graceful_shutdown_timeout_ms: u64,
    restore_tasks_on_restart: bool,
}

impl RunnerBuilder {
    pub fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
            capacity: 2,
            graceful_shutdown_timeout_ms: 10_000,
            restore_tasks_on_restart: false,
        }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn graceful_ms(mut self, ms: u64) -> Self {
        self.graceful_shutdown_timeout_ms = ms;
        self
    }

    pub fn restore_on_restart(mut self, val: bool) -> Self {
        self.restore_tasks_on_restart = val;
        self
    }

    pub fn build(self) -> RunnerHarness {
        let tmp = tempfile::tempdir().expect("creating temp base dir");
        let base_dir = tmp.path().to_path_buf();

        let config = ForkingConfig {
            java_command: "bash".to_string(),
            java_opts: String::new(),
            classpath: self.script,
            start_port: 8100,
            allowed_prefixes: Vec::new(),
            separate_ingestion_endpoint: false,
        };
        let task_config = TaskConfig {
            base_task_dir: base_dir.clone(),
            restore_tasks_on_restart: self.restore_tasks_on_restart,
            graceful_shutdown_timeout_ms: self.graceful_shutdown_timeout_ms,
        };
        let worker_config = WorkerConfig {
            capacity: self.capacity,
        };

        let pushed = Arc::new(Mutex::new(Vec::new()));
        let runner = ForkingTaskRunner::new(
            config,
            task_config,
            worker_config,
            Properties::new(),
            Arc::new(RecordingLogPusher::new(Arc::clone(&pushed))),
            NodeConfig::default(),
        );

        RunnerHarness {
            runner,
            base_dir,
            pushed,
            _tmp: tmp,
        }
    }
}
