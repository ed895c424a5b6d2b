// src/runner.rs

//! The runner orchestrator: the public surface of the crate.
//!
//! A single [`ForkingTaskRunner`] per node accepts task submissions, bounds
//! how many children run at once, tracks every live work item, and drives
//! per-task shutdown, process-wide stop, restart restore, and log streaming.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{info, warn};

use crate::config::{ForkingConfig, NodeConfig, Properties, TaskConfig, WorkerConfig};
use crate::errors::{Result, RunnerError};
use crate::exec::holder::{TaskCompletion, WorkItem};
use crate::exec::supervisor;
use crate::logs::{TaskLogPusher, TaskLogStream};
use crate::ports::PortFinder;
use crate::restore::RestoreList;
use crate::task::{Task, TaskStatus};

/// Autoscaling telemetry marker. The forking runner never produces any; the
/// accessor exists so callers can treat all runners uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingStats;

/// State shared between the runner and its supervisor activations.
pub(crate) struct Shared {
    pub(crate) config: ForkingConfig,
    pub(crate) task_config: TaskConfig,
    pub(crate) props: Properties,
    pub(crate) node: NodeConfig,
    pub(crate) log_pusher: Arc<dyn TaskLogPusher>,

    /// The single authoritative index of live tasks. Every structural
    /// mutation happens under this lock, including the spawn critical
    /// section in the supervisor.
    pub(crate) tasks: Mutex<HashMap<String, WorkItem>>,

    pub(crate) ports: Mutex<PortFinder>,
    pub(crate) restore_list: RestoreList,
    pub(crate) worker_slots: Arc<Semaphore>,

    stopping: AtomicBool,

    /// Cloned into every activation; `stop()` drops the runner's own copy
    /// and the pool counts as drained once `drained` observes channel close.
    activation: Mutex<Option<mpsc::Sender<()>>>,
    drained: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Shared {
    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Rewrite the restore file from the current table. Caller holds the
    /// table lock, so the snapshot is consistent with the mutation that
    /// triggered it.
    pub(crate) fn save_running_tasks(&self, tasks: &HashMap<String, WorkItem>) {
        let mut task_ids: Vec<String> = tasks.keys().cloned().collect();
        task_ids.sort();
        self.restore_list.save(&task_ids);
    }
}

/// Runs tasks in separate processes using the "internal peon" verb.
pub struct ForkingTaskRunner {
    shared: Arc<Shared>,
}

impl ForkingTaskRunner {
    pub fn new(
        config: ForkingConfig,
        task_config: TaskConfig,
        worker_config: WorkerConfig,
        props: Properties,
        log_pusher: Arc<dyn TaskLogPusher>,
        node: NodeConfig,
    ) -> Self {
        let ports = PortFinder::new(config.start_port);
        let restore_list = RestoreList::new(task_config.base_task_dir());
        let (activation_tx, drained_rx) = mpsc::channel::<()>(1);

        Self {
            shared: Arc::new(Shared {
                config,
                task_config,
                props,
                node,
                log_pusher,
                tasks: Mutex::new(HashMap::new()),
                ports: Mutex::new(ports),
                restore_list,
                worker_slots: Arc::new(Semaphore::new(worker_config.capacity)),
                stopping: AtomicBool::new(false),
                activation: Mutex::new(Some(activation_tx)),
                drained: Mutex::new(Some(drained_rx)),
            }),
        }
    }

    /// No state setup required; everything is lazy.
    pub fn start(&self) {}

    /// Submit a task. Resubmitting a known id returns the existing
    /// completion handle; after `stop()` new ids are refused.
    ///
    /// Must be called from within a tokio runtime (the supervisor activation
    /// is spawned onto it).
    pub fn run(&self, task: Task) -> Result<TaskCompletion> {
        let mut tasks = self.shared.tasks.lock();

        if let Some(existing) = tasks.get(&task.id) {
            return Ok(existing.completion());
        }

        let activation_guard = self
            .shared
            .activation
            .lock()
            .as_ref()
            .cloned()
            .ok_or_else(|| RunnerError::Stopping(task.id.clone()))?;

        let (status_tx, status_rx) = oneshot::channel::<TaskStatus>();
        let fallback_id = task.id.clone();
        let completion: TaskCompletion = status_rx
            .map(move |result| result.unwrap_or_else(|_| TaskStatus::failure(&fallback_id)))
            .boxed()
            .shared();

        tokio::spawn(supervisor::run_supervised(
            self.shared.clone(),
            task.clone(),
            status_tx,
            activation_guard,
        ));

        tasks.insert(task.id.clone(), WorkItem::new(task, completion.clone()));
        self.shared.save_running_tasks(&tasks);

        Ok(completion)
    }

    /// Cancel one task: mark its work item, then destroy the child if one
    /// was spawned. Unknown ids are ignored.
    pub fn shutdown(&self, task_id: &str) {
        let holder = {
            let mut tasks = self.shared.tasks.lock();
            match tasks.get_mut(task_id) {
                None => {
                    info!(task = %task_id, "ignoring request to cancel unknown task");
                    return;
                }
                Some(item) => {
                    item.shutdown = true;
                    item.process_holder.clone()
                }
            }
        };

        // Destroy outside the lock; the child's exit drives the normal
        // failure path in its supervisor.
        if let Some(holder) = holder {
            info!(task = %task_id, "killing process for task");
            holder.destroy();
        }
    }

    /// Process-wide graceful shutdown.
    ///
    /// Children are asked to finish via stdin EOF, then the runner waits up
    /// to the configured graceful timeout for all activations to drain.
    /// Survivors are reported, not force-killed. No operations are valid
    /// after this returns.
    pub async fn stop(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);

        // Refuse further submissions; queued activations may still drain.
        self.shared.activation.lock().take();

        {
            let tasks = self.shared.tasks.lock();
            for (task_id, item) in tasks.iter() {
                if let Some(holder) = &item.process_holder {
                    info!(task = %task_id, "closing stdin of task");
                    holder.close_stdin();
                }
            }
        }

        let timeout = self.shared.task_config.graceful_shutdown_timeout();
        if timeout.is_zero() {
            warn!("graceful shutdown timeout is zero; not waiting for tasks to finish");
            return;
        }

        let Some(mut drained) = self.shared.drained.lock().take() else {
            return;
        };

        info!(
            timeout_ms = timeout.as_millis() as u64,
            "waiting for tasks to stop"
        );
        let start = Instant::now();
        match tokio::time::timeout(timeout, drained.recv()).await {
            Ok(_) => {
                info!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "finished stopping"
                );
            }
            Err(_) => {
                let still_running: Vec<String> =
                    self.shared.tasks.lock().keys().cloned().collect();
                warn!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    still_running = ?still_running,
                    "tasks failed to stop in time; not waiting for them any longer"
                );
            }
        }
    }

    /// Re-submit tasks recorded by the restore file, best effort.
    ///
    /// Entries whose directory is missing, whose `task.json` is malformed or
    /// carries the wrong id, or which decline restoration are skipped
    /// without affecting the others.
    pub fn restore(&self) -> Vec<(Task, TaskCompletion)> {
        let mut restored = Vec::new();
        for task_id in self.shared.restore_list.load() {
            match self.restore_task(&task_id) {
                Ok(Some(entry)) => restored.push(entry),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        task = %task_id,
                        error = %err,
                        "failed to restore task; trying to restore other tasks"
                    );
                }
            }
        }
        info!(count = restored.len(), "restored tasks");
        restored
    }

    fn restore_task(&self, task_id: &str) -> Result<Option<(Task, TaskCompletion)>> {
        let task_file = self.shared.task_config.task_dir(task_id).join("task.json");
        let task: Task = serde_json::from_slice(&fs::read(&task_file)?)?;

        if task.id != task_id {
            return Err(RunnerError::RestoredTaskIdMismatch {
                expected: task_id.to_string(),
                actual: task.id,
            });
        }

        if self.shared.task_config.restore_tasks_on_restart && task.can_restore {
            info!(task = %task.id, "restoring task");
            let completion = self.run(task.clone())?;
            Ok(Some((task, completion)))
        } else {
            Ok(None)
        }
    }

    /// Tasks with a spawned child.
    pub fn running_tasks(&self) -> Vec<String> {
        self.collect_ids(|item| item.is_running())
    }

    /// Tasks submitted but not yet spawned.
    pub fn pending_tasks(&self) -> Vec<String> {
        self.collect_ids(|item| !item.is_running())
    }

    pub fn known_tasks(&self) -> Vec<String> {
        self.collect_ids(|_| true)
    }

    fn collect_ids(&self, keep: impl Fn(&WorkItem) -> bool) -> Vec<String> {
        let tasks = self.shared.tasks.lock();
        let mut ids: Vec<String> = tasks
            .iter()
            .filter(|(_, item)| keep(item))
            .map(|(task_id, _)| task_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Deferred reader over a task's log, present only while its child is
    /// spawned. Negative offsets mean "last N bytes".
    pub fn stream_task_log(&self, task_id: &str, offset: i64) -> Option<TaskLogStream> {
        let tasks = self.shared.tasks.lock();
        tasks
            .get(task_id)
            .and_then(|item| item.process_holder.as_ref())
            .map(|holder| TaskLogStream::new(holder.log_file().to_path_buf(), offset))
    }

    /// This runner does not participate in autoscaling.
    pub fn scaling_stats(&self) -> Option<ScalingStats> {
        None
    }
}
