//! Task runtime
//!
//! The boundary between a supervisor and whatever actually runs a task's
//! compute. A runtime starts the workload and reports what happens to it as a
//! stream of [`RuntimeEvent`]s; the supervisor turns those into state changes
//! and log entries.

use async_trait::async_trait;
use kernelhub_core::domain::task::{Task, TaskKind};
use kernelhub_core::dto::task::ContextFile;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Capacity of the event channel between a running task and its supervisor
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long to wait for output readers after the process has exited
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Something that happened to a running task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// One line of output
    Output { stream: OutputStream, line: String },
    /// The workload exited
    Exited { exit_code: Option<i32> },
    /// The runtime lost track of the workload
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Errors raised while starting a task
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no entrypoint given and {0} tasks have no default")]
    MissingEntrypoint(TaskKind),

    #[error("invalid context file path '{0}'")]
    InvalidPath(String),

    #[error("failed to prepare working directory: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("runtime unavailable: {0}")]
    Unavailable(String),
}

/// A started task as seen by its supervisor
pub struct RuntimeSession {
    pub events: mpsc::Receiver<RuntimeEvent>,
    kill: Option<oneshot::Sender<()>>,
}

impl RuntimeSession {
    pub fn new(events: mpsc::Receiver<RuntimeEvent>, kill: oneshot::Sender<()>) -> Self {
        Self {
            events,
            kill: Some(kill),
        }
    }

    /// Asks the runtime to stop the workload
    ///
    /// Only the first call sends a signal. The runtime answers with an
    /// `Exited` event once the workload is gone.
    pub fn kill(&mut self) -> bool {
        match self.kill.take() {
            Some(kill) => kill.send(()).is_ok(),
            None => false,
        }
    }
}

/// Starts task workloads
#[async_trait]
pub trait TaskRuntime: Send + Sync {
    /// Starts the workload of `task` with `files` in its working directory
    async fn start(
        &self,
        task: &Task,
        files: &[ContextFile],
    ) -> Result<RuntimeSession, RuntimeError>;
}

/// Runs each task as a local child process
///
/// Every task gets its own working directory under `workdir`, named after the
/// task id, where context files are written before the entrypoint starts.
pub struct ProcessRuntime {
    workdir: PathBuf,
}

impl ProcessRuntime {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }

    /// Command line used when a launch request does not provide one
    pub fn default_entrypoint(kind: TaskKind) -> Option<Vec<String>> {
        let argv: &[&str] = match kind {
            TaskKind::Notebook => &["jupyter", "lab", "--no-browser", "--ip=0.0.0.0"],
            TaskKind::Tensorboard => &["tensorboard", "--logdir", ".", "--bind_all"],
            TaskKind::Shell => &["sh", "-i"],
            TaskKind::Command => return None,
        };
        Some(argv.iter().map(|s| s.to_string()).collect())
    }

    fn entrypoint(task: &Task) -> Result<Vec<String>, RuntimeError> {
        if !task.config.entrypoint.is_empty() {
            return Ok(task.config.entrypoint.clone());
        }
        Self::default_entrypoint(task.kind).ok_or(RuntimeError::MissingEntrypoint(task.kind))
    }

    async fn write_context(dir: &Path, files: &[ContextFile]) -> Result<(), RuntimeError> {
        for file in files {
            let relative = Path::new(&file.path);
            if !is_safe_relative_path(relative) {
                return Err(RuntimeError::InvalidPath(file.path.clone()));
            }

            let target = dir.join(relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, file.content.as_bytes()).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl TaskRuntime for ProcessRuntime {
    async fn start(
        &self,
        task: &Task,
        files: &[ContextFile],
    ) -> Result<RuntimeSession, RuntimeError> {
        let argv = Self::entrypoint(task)?;

        let dir = self.workdir.join(task.id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        Self::write_context(&dir, files).await?;

        debug!(task_id = %task.id, command = ?argv, dir = %dir.display(), "Spawning task process");

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .envs(&task.config.environment)
            .env("KERNELHUB_TASK_ID", task.id.to_string())
            .env("KERNELHUB_TASK_OWNER", &task.owner)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                command: argv.join(" "),
                source,
            })?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        let stdout = child
            .stdout
            .take()
            .map(|out| spawn_line_reader(out, OutputStream::Stdout, tx.clone()));
        let stderr = child
            .stderr
            .take()
            .map(|err| spawn_line_reader(err, OutputStream::Stderr, tx.clone()));

        let task_id = task.id;
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    info!(task_id = %task_id, "Killing task process");
                    if let Err(e) = child.start_kill() {
                        warn!(task_id = %task_id, "Failed to signal task process: {}", e);
                    }
                    child.wait().await
                }
            };

            // Output lines must reach the supervisor before the exit event.
            for reader in [stdout, stderr].into_iter().flatten() {
                if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await.is_err() {
                    warn!(task_id = %task_id, "Output reader did not finish after exit");
                }
            }

            let event = match status {
                Ok(status) => RuntimeEvent::Exited {
                    exit_code: status.code(),
                },
                Err(e) => RuntimeEvent::Failed {
                    reason: format!("failed to wait for task process: {}", e),
                },
            };
            let _ = tx.send(event).await;
        });

        Ok(RuntimeSession::new(rx, kill_tx))
    }
}

fn spawn_line_reader<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::Sender<RuntimeEvent>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = decode_line(&buf);
                    if tx.send(RuntimeEvent::Output { stream, line }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Stopped reading task output: {}", e);
                    break;
                }
            }
        }
    })
}

/// Decodes one raw output line, replacing invalid UTF-8
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Whether `path` stays inside the directory it is joined to
pub fn is_safe_relative_path(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Runtime driven by tests

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Runtime whose tasks only do what the test tells them to
    pub(crate) struct ScriptedRuntime {
        senders: Mutex<HashMap<Uuid, mpsc::Sender<RuntimeEvent>>>,
        fail_start: bool,
        exit_on_kill: bool,
        start_delay: Duration,
    }

    impl ScriptedRuntime {
        /// Tasks run until killed or told to exit
        pub(crate) fn new() -> Self {
            Self {
                senders: Mutex::new(HashMap::new()),
                fail_start: false,
                exit_on_kill: true,
                start_delay: Duration::ZERO,
            }
        }

        /// Every start fails
        pub(crate) fn failing() -> Self {
            Self {
                fail_start: true,
                ..Self::new()
            }
        }

        /// Kill signals are never answered
        pub(crate) fn ignoring_kill() -> Self {
            Self {
                exit_on_kill: false,
                ..Self::new()
            }
        }

        /// Every start takes `delay` before the task runs
        pub(crate) fn slow_start(delay: Duration) -> Self {
            Self {
                start_delay: delay,
                ..Self::new()
            }
        }

        pub(crate) fn is_started(&self, id: Uuid) -> bool {
            self.senders.lock().unwrap().contains_key(&id)
        }

        pub(crate) async fn emit(&self, id: Uuid, event: RuntimeEvent) {
            let tx = self.senders.lock().unwrap().get(&id).cloned();
            tx.expect("task was not started")
                .send(event)
                .await
                .expect("supervisor stopped");
        }

        pub(crate) async fn output(&self, id: Uuid, line: &str) {
            self.emit(
                id,
                RuntimeEvent::Output {
                    stream: OutputStream::Stdout,
                    line: line.to_string(),
                },
            )
            .await;
        }
    }

    #[async_trait]
    impl TaskRuntime for ScriptedRuntime {
        async fn start(
            &self,
            task: &Task,
            _files: &[ContextFile],
        ) -> Result<RuntimeSession, RuntimeError> {
            if !self.start_delay.is_zero() {
                tokio::time::sleep(self.start_delay).await;
            }
            if self.fail_start {
                return Err(RuntimeError::Unavailable("no agents available".to_string()));
            }

            let (tx, rx) = mpsc::channel(64);
            let (kill_tx, kill_rx) = oneshot::channel::<()>();

            let exit_tx = tx.clone();
            let exit_on_kill = self.exit_on_kill;
            tokio::spawn(async move {
                if kill_rx.await.is_ok() && exit_on_kill {
                    let _ = exit_tx
                        .send(RuntimeEvent::Exited {
                            exit_code: Some(137),
                        })
                        .await;
                }
            });

            self.senders.lock().unwrap().insert(task.id, tx);
            Ok(RuntimeSession::new(rx, kill_tx))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kernelhub_core::domain::task::{TaskConfig, TaskState};
    use uuid::Uuid;

    fn task_with(kind: TaskKind, entrypoint: &[&str]) -> Task {
        Task {
            id: Uuid::new_v4(),
            kind,
            state: TaskState::Starting,
            owner: "alice".to_string(),
            template_name: None,
            config: TaskConfig {
                entrypoint: entrypoint.iter().map(|s| s.to_string()).collect(),
                ..TaskConfig::default()
            },
            started_at: Utc::now(),
            terminated_at: None,
            exit: None,
        }
    }

    async fn collect_until_exit(session: &mut RuntimeSession) -> Vec<RuntimeEvent> {
        let mut events = Vec::new();
        while let Some(event) = session.events.recv().await {
            let done = !matches!(event, RuntimeEvent::Output { .. });
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    #[test]
    fn test_default_entrypoints() {
        assert!(ProcessRuntime::default_entrypoint(TaskKind::Notebook).is_some());
        assert!(ProcessRuntime::default_entrypoint(TaskKind::Shell).is_some());
        assert!(ProcessRuntime::default_entrypoint(TaskKind::Tensorboard).is_some());
        assert!(ProcessRuntime::default_entrypoint(TaskKind::Command).is_none());
    }

    #[test]
    fn test_safe_relative_paths() {
        assert!(is_safe_relative_path(Path::new("notebook.ipynb")));
        assert!(is_safe_relative_path(Path::new("./data/train.csv")));
        assert!(!is_safe_relative_path(Path::new("../escape")));
        assert!(!is_safe_relative_path(Path::new("/etc/passwd")));
        assert!(!is_safe_relative_path(Path::new("")));
    }

    #[tokio::test]
    async fn test_command_without_entrypoint_is_rejected() {
        let runtime = ProcessRuntime::new(std::env::temp_dir().join("kernelhub-tests"));
        let task = task_with(TaskKind::Command, &[]);

        let result = runtime.start(&task, &[]).await;
        assert!(matches!(result, Err(RuntimeError::MissingEntrypoint(TaskKind::Command))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_output_precedes_exit() {
        let runtime = ProcessRuntime::new(std::env::temp_dir().join("kernelhub-tests"));
        let task = task_with(
            TaskKind::Command,
            &["sh", "-c", "cat input.txt; echo oops 1>&2; exit 3"],
        );
        let files = vec![ContextFile {
            path: "input.txt".to_string(),
            content: "hello\n".to_string(),
        }];

        let mut session = runtime.start(&task, &files).await.unwrap();
        let events = collect_until_exit(&mut session).await;

        assert!(events.contains(&RuntimeEvent::Output {
            stream: OutputStream::Stdout,
            line: "hello".to_string(),
        }));
        assert!(events.contains(&RuntimeEvent::Output {
            stream: OutputStream::Stderr,
            line: "oops".to_string(),
        }));
        assert_eq!(
            events.last(),
            Some(&RuntimeEvent::Exited { exit_code: Some(3) })
        );
    }

    #[test]
    fn test_decode_line_is_lossy() {
        assert_eq!(decode_line(b"plain\n"), "plain");
        assert_eq!(decode_line(b"crlf\r\n"), "crlf");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{fffd} byte");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_output_keeps_process_alive() {
        let runtime = ProcessRuntime::new(std::env::temp_dir().join("kernelhub-tests"));
        let task = task_with(
            TaskKind::Command,
            &["sh", "-c", "printf 'bad \\377 byte\\n'; sleep 0.2; echo after; exit 0"],
        );

        let mut session = runtime.start(&task, &[]).await.unwrap();
        let events = tokio::time::timeout(Duration::from_secs(5), collect_until_exit(&mut session))
            .await
            .expect("process did not exit");

        assert_eq!(
            events,
            vec![
                RuntimeEvent::Output {
                    stream: OutputStream::Stdout,
                    line: "bad \u{fffd} byte".to_string(),
                },
                RuntimeEvent::Output {
                    stream: OutputStream::Stdout,
                    line: "after".to_string(),
                },
                RuntimeEvent::Exited { exit_code: Some(0) },
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_stops_process() {
        let runtime = ProcessRuntime::new(std::env::temp_dir().join("kernelhub-tests"));
        let task = task_with(TaskKind::Command, &["sleep", "30"]);

        let mut session = runtime.start(&task, &[]).await.unwrap();
        assert!(session.kill());
        assert!(!session.kill());

        let events = tokio::time::timeout(Duration::from_secs(5), collect_until_exit(&mut session))
            .await
            .expect("process was not killed");
        assert!(matches!(
            events.last(),
            Some(RuntimeEvent::Exited { exit_code: None })
        ));
    }
}
