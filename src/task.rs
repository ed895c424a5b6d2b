// src/task.rs

//! Task and task-status records exchanged with peon processes.
//!
//! Both are serialized as camelCase JSON: the runner writes `task.json` into
//! the task directory, the child writes `status.json` into its attempt
//! directory.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of work handed to a child process.
///
/// The runner treats the task as opaque beyond the fields needed to build the
/// child's command line; `context` is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub data_source: String,

    /// Prepended to the configured classpath when launching this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classpath_prefix: Option<String>,

    /// Forwarded verbatim as `--nodeType <value>` on the child command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,

    #[serde(default)]
    pub context: BTreeMap<String, Value>,

    /// Whether the task tolerates being re-run after a runner restart.
    #[serde(default)]
    pub can_restore: bool,
}

impl Task {
    /// Fetch a context value as a string, if present and string-typed.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }
}

/// Terminal (or in-flight) state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Running,
    Success,
    Failed,
}

/// Outcome record for a task, written by the child on success and
/// synthesized by the runner on every failure path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: String,
    pub status: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

impl TaskStatus {
    pub fn success(task_id: &str) -> Self {
        Self {
            id: task_id.to_string(),
            status: TaskState::Success,
            duration: None,
        }
    }

    pub fn failure(task_id: &str) -> Self {
        Self {
            id: task_id.to_string(),
            status: TaskState::Failed,
            duration: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskState::Success
    }

    pub fn is_complete(&self) -> bool {
        self.status != TaskState::Running
    }
}
