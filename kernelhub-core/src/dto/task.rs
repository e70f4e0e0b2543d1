//! Task DTOs

use serde::{Deserialize, Serialize};

use crate::domain::task::{Task, TaskConfig, TaskKind, TaskState};

/// Request to launch a new task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchTask {
    pub kind: TaskKind,

    /// Identity of the caller, already authenticated upstream
    pub owner: String,

    #[serde(default)]
    pub template_name: Option<String>,

    #[serde(default)]
    pub config: TaskConfig,

    /// Context files materialized in the task's working directory
    #[serde(default)]
    pub files: Vec<ContextFile>,
}

/// A file uploaded alongside a launch request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFile {
    /// Path relative to the task working directory
    pub path: String,
    pub content: String,
}

/// Field a task listing is sorted by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Id,
    StartTime,
    Description,
    State,
    Owner,
    Kind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    Asc,
    Desc,
}

/// Filter, ordering and pagination of a task listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TaskKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default)]
    pub sort_by: SortBy,

    #[serde(default)]
    pub order_by: OrderBy,

    /// First item of the page; negative values count from the end
    #[serde(default)]
    pub offset: i64,

    /// Page size; values <= 0 use the server maximum
    #[serde(default)]
    pub limit: i64,
}

/// Pagination details of a listing
///
/// `total` is the number of items matching the filter, independent of `limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: i64,
    pub limit: i64,
    pub start_index: usize,
    pub end_index: usize,
    pub total: usize,
}

/// One page of tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub pagination: Pagination,
}
