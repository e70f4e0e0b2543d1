//! Task domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A supervised background task
///
/// Snapshot of the state owned by the task's supervisor on the master.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub state: TaskState,
    pub owner: String,
    pub template_name: Option<String>,
    pub config: TaskConfig,
    pub started_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub exit: Option<TaskExit>,
}

impl Task {
    /// Human readable description, falling back to the kind and short id
    pub fn description(&self) -> String {
        match &self.config.description {
            Some(description) => description.clone(),
            None => {
                let id = self.id.to_string();
                format!("{} ({})", self.kind, &id[..8])
            }
        }
    }
}

/// The kind of workload a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Notebook,
    Command,
    Shell,
    Tensorboard,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Notebook => write!(f, "notebook"),
            TaskKind::Command => write!(f, "command"),
            TaskKind::Shell => write!(f, "shell"),
            TaskKind::Tensorboard => write!(f, "tensorboard"),
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "notebook" => Ok(TaskKind::Notebook),
            "command" => Ok(TaskKind::Command),
            "shell" => Ok(TaskKind::Shell),
            "tensorboard" => Ok(TaskKind::Tensorboard),
            other => Err(format!("unknown task kind '{}'", other)),
        }
    }
}

/// Lifecycle state of a task
///
/// States are ordered; a task only ever moves forward through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Starting,
    Running,
    Terminating,
    Terminated,
}

impl TaskState {
    /// Whether the task has finished and will never change again
    pub fn is_terminal(self) -> bool {
        self == TaskState::Terminated
    }

    /// Whether the task may still be killed
    pub fn is_killable(self) -> bool {
        matches!(self, TaskState::Starting | TaskState::Running)
    }

    /// Whether moving from `self` to `next` is a forward transition
    pub fn can_transition_to(self, next: TaskState) -> bool {
        next > self
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Starting => write!(f, "Starting"),
            TaskState::Running => write!(f, "Running"),
            TaskState::Terminating => write!(f, "Terminating"),
            TaskState::Terminated => write!(f, "Terminated"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "starting" => Ok(TaskState::Starting),
            "running" => Ok(TaskState::Running),
            "terminating" => Ok(TaskState::Terminating),
            "terminated" => Ok(TaskState::Terminated),
            other => Err(format!("unknown task state '{}'", other)),
        }
    }
}

/// Spawn parameters of a task
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    #[serde(default)]
    pub description: Option<String>,

    /// Command line to run; empty means the kind's default
    #[serde(default)]
    pub entrypoint: Vec<String>,

    /// Number of accelerator slots requested from the scheduler
    #[serde(default)]
    pub slots: u32,

    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// Final outcome of a terminated task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskExit {
    pub reason: ExitReason,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// The task process exited on its own
    Completed,
    /// The task was stopped by a kill request
    Killed,
    /// The task could not be started or its runtime failed
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions_only_move_forward() {
        assert!(TaskState::Starting.can_transition_to(TaskState::Running));
        assert!(TaskState::Starting.can_transition_to(TaskState::Terminating));
        assert!(TaskState::Running.can_transition_to(TaskState::Terminated));
        assert!(!TaskState::Running.can_transition_to(TaskState::Starting));
        assert!(!TaskState::Terminated.can_transition_to(TaskState::Terminated));
    }

    #[test]
    fn test_killable_states() {
        assert!(TaskState::Starting.is_killable());
        assert!(TaskState::Running.is_killable());
        assert!(!TaskState::Terminating.is_killable());
        assert!(!TaskState::Terminated.is_killable());
    }

    #[test]
    fn test_kind_parse_and_display() {
        assert_eq!("Notebook".parse::<TaskKind>(), Ok(TaskKind::Notebook));
        assert_eq!(TaskKind::Tensorboard.to_string(), "tensorboard");
        assert!("trial".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        let json = serde_json::to_string(&TaskKind::Shell).unwrap();
        assert_eq!(json, "\"shell\"");
    }

    #[test]
    fn test_description_fallback() {
        let task = Task {
            id: Uuid::new_v4(),
            kind: TaskKind::Notebook,
            state: TaskState::Starting,
            owner: "alice".to_string(),
            template_name: None,
            config: TaskConfig::default(),
            started_at: Utc::now(),
            terminated_at: None,
            exit: None,
        };
        assert!(task.description().starts_with("notebook ("));

        let named = Task {
            config: TaskConfig {
                description: Some("my notebook".to_string()),
                ..TaskConfig::default()
            },
            ..task
        };
        assert_eq!(named.description(), "my notebook");
    }
}
