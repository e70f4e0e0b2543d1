//! Task-related API endpoints

use crate::KernelhubClient;
use crate::error::Result;
use kernelhub_core::domain::task::Task;
use kernelhub_core::dto::task::{LaunchTask, ListTasksQuery, TaskPage};
use uuid::Uuid;

impl KernelhubClient {
    // =============================================================================
    // Task Lifecycle
    // =============================================================================

    /// Launch a new task
    ///
    /// The returned task is usually still `Starting`.
    pub async fn launch_task(&self, req: LaunchTask) -> Result<Task> {
        let url = format!("{}/tasks", self.base_url);
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Get a task by ID
    pub async fn get_task(&self, task_id: Uuid) -> Result<Task> {
        let url = format!("{}/tasks/{}", self.base_url, task_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List tasks with filtering, sorting and pagination
    pub async fn list_tasks(&self, query: &ListTasksQuery) -> Result<TaskPage> {
        let url = format!("{}/tasks", self.base_url);
        let response = self.client.get(&url).query(query).send().await?;

        self.handle_response(response).await
    }

    /// Kill a task
    ///
    /// Succeeds for tasks that are already stopping or stopped.
    pub async fn kill_task(&self, task_id: Uuid) -> Result<()> {
        let url = format!("{}/tasks/{}/kill", self.base_url, task_id);
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// Remove a task right away, killing it first if needed
    pub async fn purge_task(&self, task_id: Uuid) -> Result<()> {
        let url = format!("{}/tasks/{}", self.base_url, task_id);
        let response = self.client.delete(&url).send().await?;

        self.handle_empty_response(response).await
    }
}
