//! Task supervisor
//!
//! Each task is owned by one supervisor: a tokio task that holds the task's
//! state machine and its log buffer, starts the workload through a
//! [`TaskRuntime`] and processes control commands one at a time from a
//! bounded mailbox.
//!
//! Readers never go through the mailbox. Snapshots are published on a watch
//! channel and the log buffer is shared behind an `Arc`.

use chrono::Utc;
use kernelhub_core::domain::log::LogLevel;
use kernelhub_core::domain::task::{ExitReason, Task, TaskExit, TaskState};
use kernelhub_core::dto::task::ContextFile;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::service::error::{Result, ServiceError};
use crate::service::log_buffer::LogBuffer;
use crate::service::runtime::{
    OutputStream, RuntimeError, RuntimeEvent, RuntimeSession, TaskRuntime,
};

const MAILBOX_CAPACITY: usize = 32;

/// Control commands accepted by a supervisor
enum Command {
    Kill { reply: oneshot::Sender<()> },
}

/// Cloneable reference to a running supervisor
#[derive(Clone)]
pub struct TaskHandle {
    id: Uuid,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Task>,
    logs: Arc<LogBuffer>,
    bridges: Arc<AtomicUsize>,
    ask_timeout: Duration,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state of the task
    pub fn snapshot(&self) -> Task {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> TaskState {
        self.snapshot.borrow().state
    }

    pub fn logs(&self) -> &Arc<LogBuffer> {
        &self.logs
    }

    /// Number of log streams currently reading this task
    pub fn active_bridges(&self) -> usize {
        self.bridges.load(Ordering::Acquire)
    }

    /// Registers a log stream; the count drops when the lease is dropped
    pub fn lease(&self) -> BridgeLease {
        self.bridges.fetch_add(1, Ordering::AcqRel);
        BridgeLease {
            bridges: Arc::clone(&self.bridges),
        }
    }

    /// Asks the supervisor to kill the task
    ///
    /// Returns once the kill is accepted. Killing a task that is already
    /// terminating or terminated succeeds without doing anything.
    pub async fn kill(&self) -> Result<()> {
        if !self.state().is_killable() {
            return Ok(());
        }

        let (reply, response) = oneshot::channel();
        let ask = async {
            self.commands.send(Command::Kill { reply }).await.ok()?;
            response.await.ok()
        };

        match tokio::time::timeout(self.ask_timeout, ask).await {
            Ok(Some(())) => Ok(()),
            Ok(None) => self.stopped(),
            Err(_) => Err(ServiceError::Internal(format!(
                "task {} did not answer within {:?}",
                self.id, self.ask_timeout
            ))),
        }
    }

    /// Outcome of a request whose supervisor went away
    fn stopped(&self) -> Result<()> {
        if self.state().is_terminal() {
            Ok(())
        } else {
            Err(ServiceError::Aborted(format!(
                "supervisor of task {} stopped",
                self.id
            )))
        }
    }

    /// Waits until the task reaches at least `state`
    #[cfg(test)]
    pub async fn wait_for_state(&self, state: TaskState) -> Task {
        let mut snapshot = self.snapshot.clone();
        let task = snapshot
            .wait_for(|task| task.state >= state)
            .await
            .expect("supervisor dropped its snapshot");
        task.clone()
    }
}

/// Active log stream registration on a task
pub struct BridgeLease {
    bridges: Arc<AtomicUsize>,
}

impl Drop for BridgeLease {
    fn drop(&mut self) {
        self.bridges.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Starts a supervisor for `task` and returns its handle
///
/// The task must be in the `Starting` state. The launch itself is the first
/// entry of the task's log.
pub fn spawn(
    task: Task,
    files: Vec<ContextFile>,
    runtime: Arc<dyn TaskRuntime>,
    config: &Config,
) -> TaskHandle {
    let logs = Arc::new(LogBuffer::new());
    logs.append(
        LogLevel::Info,
        format!(
            "Launching {} task {} for {}",
            task.kind, task.id, task.owner
        ),
    );

    let (snapshot_tx, snapshot_rx) = watch::channel(task.clone());
    let (commands_tx, commands_rx) = mpsc::channel(MAILBOX_CAPACITY);

    let handle = TaskHandle {
        id: task.id,
        commands: commands_tx,
        snapshot: snapshot_rx,
        logs: Arc::clone(&logs),
        bridges: Arc::new(AtomicUsize::new(0)),
        ask_timeout: config.ask_timeout,
    };

    let supervisor = Supervisor {
        task,
        files,
        runtime,
        logs,
        snapshot: snapshot_tx,
        commands: commands_rx,
        kill_grace: config.kill_grace,
        kill_deadline: None,
    };
    tokio::spawn(supervisor.run());

    handle
}

struct Supervisor {
    task: Task,
    files: Vec<ContextFile>,
    runtime: Arc<dyn TaskRuntime>,
    logs: Arc<LogBuffer>,
    snapshot: watch::Sender<Task>,
    commands: mpsc::Receiver<Command>,
    kill_grace: Duration,
    kill_deadline: Option<Instant>,
}

impl Supervisor {
    async fn run(mut self) {
        let task_id = self.task.id;
        debug!(task_id = %task_id, kind = %self.task.kind, "Supervisor started");

        let mut session = match self.start().await {
            Some(Ok(session)) => session,
            Some(Err(e)) => {
                self.fail(format!("failed to start: {}", e));
                return;
            }
            None => {
                debug!(task_id = %task_id, "Supervisor stopped before start");
                return;
            }
        };

        self.transition(TaskState::Running);
        self.logs.append(LogLevel::Info, "Task is running");

        let mut mailbox_open = true;
        loop {
            let deadline = self.kill_deadline;

            tokio::select! {
                command = self.commands.recv(), if mailbox_open => match command {
                    Some(Command::Kill { reply }) => {
                        self.kill(&mut session);
                        let _ = reply.send(());
                    }
                    None => {
                        // Every handle is gone: nobody can observe this task any more.
                        mailbox_open = false;
                        self.kill(&mut session);
                    }
                },
                event = session.events.recv() => match event {
                    Some(RuntimeEvent::Output { stream, line }) => {
                        let level = match stream {
                            OutputStream::Stdout => LogLevel::Info,
                            OutputStream::Stderr => LogLevel::Warning,
                        };
                        self.logs.append(level, line);
                    }
                    Some(RuntimeEvent::Exited { exit_code }) => {
                        self.exited(exit_code);
                        break;
                    }
                    Some(RuntimeEvent::Failed { reason }) => {
                        self.fail(reason);
                        break;
                    }
                    None => {
                        self.fail("runtime stopped reporting without an exit status".to_string());
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.logs.append(
                        LogLevel::Warning,
                        format!("Task did not exit within {:?} of the kill request", self.kill_grace),
                    );
                    self.finish(ExitReason::Killed, None, Some("kill grace period expired".to_string()));
                    break;
                }
            }
        }

        debug!(task_id = %task_id, "Supervisor stopped");
    }

    /// Starts the workload while still answering kill requests
    ///
    /// Returns `None` when the task was killed before the runtime finished
    /// starting it; the pending start is dropped.
    async fn start(&mut self) -> Option<std::result::Result<RuntimeSession, RuntimeError>> {
        let runtime = Arc::clone(&self.runtime);
        let task = self.task.clone();
        let files = std::mem::take(&mut self.files);
        let start = async move { runtime.start(&task, &files).await };
        tokio::pin!(start);

        tokio::select! {
            result = &mut start => Some(result),
            command = self.commands.recv() => {
                self.logs.append(LogLevel::Warning, "Kill requested, stopping task");
                self.transition(TaskState::Terminating);
                self.logs.append(LogLevel::Info, "Task killed before it started");
                self.finish(ExitReason::Killed, None, Some("killed while starting".to_string()));
                if let Some(Command::Kill { reply }) = command {
                    let _ = reply.send(());
                }
                None
            }
        }
    }

    /// Moves the task forward; backward or repeated transitions are ignored
    fn transition(&mut self, next: TaskState) -> bool {
        let current = self.task.state;
        if !current.can_transition_to(next) {
            warn!(
                task_id = %self.task.id,
                "Ignoring transition {} -> {}",
                current,
                next
            );
            return false;
        }

        self.task.state = next;
        if next == TaskState::Terminated {
            self.task.terminated_at = Some(Utc::now());
        }
        self.snapshot.send_replace(self.task.clone());

        info!(task_id = %self.task.id, state = %next, "Task state changed");
        true
    }

    fn kill(&mut self, session: &mut RuntimeSession) {
        if !self.task.state.is_killable() {
            debug!(task_id = %self.task.id, state = %self.task.state, "Kill ignored");
            return;
        }

        self.logs.append(LogLevel::Warning, "Kill requested, stopping task");
        self.transition(TaskState::Terminating);
        self.kill_deadline = Some(Instant::now() + self.kill_grace);

        if !session.kill() {
            warn!(task_id = %self.task.id, "Runtime no longer accepts kill signals");
        }
    }

    fn exited(&mut self, exit_code: Option<i32>) {
        let code = exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "none".to_string());

        if self.task.state == TaskState::Terminating {
            self.logs
                .append(LogLevel::Info, format!("Task killed (exit code {})", code));
            self.finish(ExitReason::Killed, exit_code, None);
        } else {
            let level = if exit_code == Some(0) {
                LogLevel::Info
            } else {
                LogLevel::Error
            };
            self.logs
                .append(level, format!("Task exited with code {}", code));
            self.finish(ExitReason::Completed, exit_code, None);
        }
    }

    /// Records a failure as the final log entry and terminates the task
    fn fail(&mut self, reason: String) {
        warn!(task_id = %self.task.id, "Task failed: {}", reason);
        self.logs
            .append(LogLevel::Error, format!("Task failed: {}", reason));
        self.finish(ExitReason::Failed, None, Some(reason));
    }

    fn finish(&mut self, reason: ExitReason, exit_code: Option<i32>, message: Option<String>) {
        self.task.exit = Some(TaskExit {
            reason,
            exit_code,
            message,
        });
        if self.task.state.is_killable() {
            self.transition(TaskState::Terminating);
        }
        self.transition(TaskState::Terminated);
        self.logs.seal();
    }
}
