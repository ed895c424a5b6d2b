// src/config.rs

//! Configuration records injected into the runner.
//!
//! Nothing in this crate reads these from disk; the embedding process builds
//! them however it likes (deserialization support is provided for callers
//! that do keep them in config files). All sections have reasonable defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Process-wide properties forwarded (selectively) to child processes.
///
/// A `BTreeMap` so that the generated `-D` flags come out in a stable order.
pub type Properties = BTreeMap<String, String>;

/// Task context key carrying per-task JVM options for the child.
pub const JAVA_OPTS_PROPERTY: &str = "druid.indexer.runner.javaOpts";

/// Filesystem layout and shutdown behaviour for tasks.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Directory under which every task keeps its working files.
    pub base_task_dir: PathBuf,

    /// Whether tasks that declare themselves restorable are re-submitted on
    /// startup via [`restore`](crate::runner::ForkingTaskRunner::restore).
    #[serde(default)]
    pub restore_tasks_on_restart: bool,

    /// How long `stop()` waits for in-flight tasks to drain, in milliseconds.
    #[serde(default = "default_graceful_shutdown_timeout_ms")]
    pub graceful_shutdown_timeout_ms: u64,
}

fn default_graceful_shutdown_timeout_ms() -> u64 {
    60_000
}

impl TaskConfig {
    pub fn new(base_task_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_task_dir: base_task_dir.into(),
            restore_tasks_on_restart: false,
            graceful_shutdown_timeout_ms: default_graceful_shutdown_timeout_ms(),
        }
    }

    /// Working directory for the given task id.
    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.base_task_dir.join(task_id)
    }

    pub fn base_task_dir(&self) -> &Path {
        &self.base_task_dir
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_shutdown_timeout_ms)
    }
}

/// How child (peon) processes are forked.
#[derive(Debug, Clone, Deserialize)]
pub struct ForkingConfig {
    /// Executable used to launch children.
    #[serde(default = "default_java_command")]
    pub java_command: String,

    /// Extra options inserted after the classpath; tokenized with
    /// [`tokenize`](crate::exec::command::tokenize).
    #[serde(default)]
    pub java_opts: String,

    /// Classpath handed to every child.
    #[serde(default)]
    pub classpath: String,

    /// Lowest port the allocator will hand out.
    #[serde(default = "default_start_port")]
    pub start_port: u16,

    /// Property-name prefixes that are forwarded to children as `-D` flags.
    #[serde(default = "default_allowed_prefixes")]
    pub allowed_prefixes: Vec<String>,

    /// When set, children get a second consecutive port for their chat
    /// handler endpoint.
    #[serde(default)]
    pub separate_ingestion_endpoint: bool,
}

fn default_java_command() -> String {
    "java".to_string()
}

fn default_start_port() -> u16 {
    8100
}

fn default_allowed_prefixes() -> Vec<String> {
    vec![
        "com.metamx".to_string(),
        "druid".to_string(),
        "io.druid".to_string(),
    ]
}

impl Default for ForkingConfig {
    fn default() -> Self {
        Self {
            java_command: default_java_command(),
            java_opts: String::new(),
            classpath: String::new(),
            start_port: default_start_port(),
            allowed_prefixes: default_allowed_prefixes(),
            separate_ingestion_endpoint: false,
        }
    }
}

/// Worker-slot sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of concurrently running child processes.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    std::cmp::max(1, num_cpus::get().saturating_sub(1))
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

/// Identity of the node the runner lives on, advertised to children.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
        }
    }
}
