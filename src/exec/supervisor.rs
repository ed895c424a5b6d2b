// src/exec/supervisor.rs

//! The supervisor activation: everything that happens to one task between
//! leaving the submission queue and resolving its completion.
//!
//! One activation owns one attempt: the attempt directory, the reserved
//! ports, the spawned child and its streams, and the log file. Cleanup runs
//! on every exit path (normal exit, child failure, cancellation before
//! spawn, internal errors), so each of those resources has exactly one
//! release site.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::{Result, RunnerError};
use crate::exec::command::build_peon_command;
use crate::exec::holder::ProcessHolder;
use crate::runner::Shared;
use crate::task::{Task, TaskStatus};

/// Entry point spawned by the runner for each submission.
///
/// Delivers exactly one status to `status_tx`; the `activation_guard` clone
/// is dropped last so `stop()` observes the pool as drained only after the
/// completion has been resolved.
pub(crate) async fn run_supervised(
    shared: Arc<Shared>,
    task: Task,
    status_tx: oneshot::Sender<TaskStatus>,
    activation_guard: mpsc::Sender<()>,
) {
    let status = supervise(shared, task).await;
    let _ = status_tx.send(status);
    drop(activation_guard);
}

async fn supervise(shared: Arc<Shared>, task: Task) -> TaskStatus {
    // The task stays pending until a worker slot frees up; the permit is
    // held through cleanup so at most `capacity` children exist at once.
    let permit = shared.worker_slots.clone().acquire_owned().await;
    let mut attempt = Attempt::new(shared, task);

    let result = match &permit {
        Ok(_) => attempt.run().await,
        Err(_) => Err(RunnerError::Stopping(attempt.task.id.clone())),
    };

    let status = match result {
        Ok(status) => status,
        Err(err) => {
            info!(
                task = %attempt.task.id,
                error = %err,
                "exception caught during task execution"
            );
            TaskStatus::failure(&attempt.task.id)
        }
    };

    attempt.cleanup();
    status
}

/// One spawn of a child for a task, under a fresh attempt id.
struct Attempt {
    shared: Arc<Shared>,
    task: Task,
    task_dir: PathBuf,
    attempt_dir: PathBuf,
    log_file: PathBuf,
    /// Ports reserved for this attempt, returned to the pool in cleanup.
    ports: Vec<u16>,
}

impl Attempt {
    fn new(shared: Arc<Shared>, task: Task) -> Self {
        let attempt_id = Uuid::new_v4().to_string();
        let task_dir = shared.task_config.task_dir(&task.id);
        let attempt_dir = task_dir.join(attempt_id);
        let log_file = task_dir.join("log");
        Self {
            shared,
            task,
            task_dir,
            attempt_dir,
            log_file,
            ports: Vec::new(),
        }
    }

    async fn run(&mut self) -> Result<TaskStatus> {
        fs::create_dir_all(&self.attempt_dir)?;

        let task_file = self.task_dir.join("task.json");
        let status_file = self.attempt_dir.join("status.json");

        let (child_port, chat_handler_port) = self.reserve_ports()?;

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let mut child = self.spawn_child(
            child_port,
            chat_handler_port,
            &task_file,
            &status_file,
            kill_tx,
        )?;

        info!(
            task = %self.task.id,
            log = %self.log_file.display(),
            "logging task output"
        );

        let run_result = self.watch_child(&mut child, kill_rx).await;

        // Upload the log regardless of how the attempt went.
        self.shared
            .log_pusher
            .push_task_log(&self.task.id, &self.log_file)
            .await?;

        if run_result? {
            Ok(serde_json::from_slice(&fs::read(&status_file)?)?)
        } else {
            Ok(TaskStatus::failure(&self.task.id))
        }
    }

    fn reserve_ports(&mut self) -> Result<(u16, Option<u16>)> {
        let mut ports = self.shared.ports.lock();
        if self.shared.config.separate_ingestion_endpoint {
            let (port, chat_port) = ports.find_two_consecutive_unused_ports()?;
            self.ports.extend([port, chat_port]);
            Ok((port, Some(chat_port)))
        } else {
            let port = ports.find_unused_port()?;
            self.ports.push(port);
            Ok((port, None))
        }
    }

    /// Spawn the child and attach its process holder to the work item.
    ///
    /// The table lock is held across the spawn so that a concurrent
    /// `shutdown` can never race a child into existence after its flag was
    /// set: either the flag is observed here and nothing is spawned, or the
    /// holder is installed first and the destroy lands on a live child.
    fn spawn_child(
        &self,
        child_port: u16,
        chat_handler_port: Option<u16>,
        task_file: &Path,
        status_file: &Path,
        kill_tx: oneshot::Sender<()>,
    ) -> Result<Child> {
        let mut tasks = self.shared.tasks.lock();

        let item = tasks
            .get_mut(&self.task.id)
            .ok_or_else(|| RunnerError::WorkItemVanished(self.task.id.clone()))?;
        if item.shutdown {
            return Err(RunnerError::TaskShutDown(self.task.id.clone()));
        }
        if item.process_holder.is_some() {
            error!(task = %self.task.id, "work item already has a process holder");
            return Err(RunnerError::ProcessAlreadyAttached(self.task.id.clone()));
        }

        let command = build_peon_command(
            &self.shared.config,
            &self.shared.props,
            &self.shared.node.host,
            &self.task,
            child_port,
            chat_handler_port,
            task_file,
            status_file,
        );

        if !task_file.exists() {
            fs::write(task_file, serde_json::to_vec(&self.task)?)?;
        }

        info!(
            task = %self.task.id,
            command = %command.join(" "),
            "running peon command"
        );

        // stderr is appended straight to the log file; stdout goes through
        // the copy loop in watch_child, so both streams land merged in `log`.
        let stderr_log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)?;

        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_log))
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning peon for task '{}'", self.task.id))?;

        item.process_holder = Some(Arc::new(ProcessHolder::new(
            child.id(),
            child.stdin.take(),
            self.log_file.clone(),
            child_port,
            kill_tx,
        )));

        Ok(child)
    }

    /// Copy the child's output into the log until EOF, then collect its exit
    /// status, honoring destroy requests at any point in between.
    async fn watch_child(
        &self,
        child: &mut Child,
        mut kill_rx: oneshot::Receiver<()>,
    ) -> Result<bool> {
        let mut stdout = child
            .stdout
            .take()
            .context("child stdout was not piped")?;

        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .await?;

        let mut copy_finished = false;
        {
            let copy = tokio::io::copy(&mut stdout, &mut log);
            tokio::pin!(copy);

            tokio::select! {
                copied = &mut copy => {
                    copied?;
                    copy_finished = true;
                }
                cancel = &mut kill_rx => {
                    if cancel.is_ok() {
                        info!(task = %self.task.id, "destroy requested; killing child process");
                        if let Err(err) = child.start_kill() {
                            warn!(task = %self.task.id, error = %err, "failed to kill child process");
                        }
                    } else {
                        debug!(task = %self.task.id, "kill channel closed without explicit destroy");
                    }
                    // Abandon the copy rather than draining it: a grandchild
                    // inheriting the pipe could hold it open indefinitely.
                    // Dropping the copy closes our read end.
                }
            }
        }
        log.flush().await?;

        let status = if copy_finished {
            // A destroy can still arrive between stdout EOF and child exit.
            tokio::select! {
                status = child.wait() => status
                    .with_context(|| format!("waiting for peon of task '{}'", self.task.id))?,
                cancel = &mut kill_rx => {
                    if cancel.is_ok() {
                        info!(task = %self.task.id, "destroy requested; killing child process");
                        if let Err(err) = child.start_kill() {
                            warn!(task = %self.task.id, error = %err, "failed to kill child process");
                        }
                    }
                    child.wait().await
                        .with_context(|| format!("waiting for peon of task '{}'", self.task.id))?
                }
            }
        } else {
            child
                .wait()
                .await
                .with_context(|| format!("waiting for peon of task '{}'", self.task.id))?
        };

        info!(
            task = %self.task.id,
            exit_code = status.code().unwrap_or(-1),
            success = status.success(),
            "peon process exited"
        );
        Ok(status.success())
    }

    /// Release everything the attempt owns. Runs on every exit path; all
    /// errors in here are logged and suppressed so the task's outcome is
    /// whatever `run` already decided.
    fn cleanup(&mut self) {
        let stopping = self.shared.is_stopping();

        {
            let mut tasks = self.shared.tasks.lock();
            if let Some(item) = tasks.remove(&self.task.id) {
                if let Some(holder) = item.process_holder {
                    holder.destroy();
                }
            }
            if !stopping {
                self.shared.save_running_tasks(&tasks);
            }
        }

        {
            let mut ports = self.shared.ports.lock();
            for port in self.ports.drain(..) {
                ports.mark_port_unused(port);
            }
        }

        if !stopping && self.task_dir.exists() {
            info!(
                task = %self.task.id,
                dir = %self.task_dir.display(),
                "removing task directory"
            );
            if let Err(err) = fs::remove_dir_all(&self.task_dir) {
                error!(
                    task = %self.task.id,
                    dir = %self.task_dir.display(),
                    error = %err,
                    "failed to delete task directory"
                );
            }
        }
    }
}
