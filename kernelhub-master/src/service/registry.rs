//! Task registry
//!
//! Addressable collection of task supervisors. Launch requests create new
//! supervisors; every other control request is routed by task id.

use chrono::Utc;
use kernelhub_core::domain::task::{Task, TaskState};
use kernelhub_core::dto::task::{LaunchTask, ListTasksQuery, OrderBy, Pagination, SortBy, TaskPage};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::service::error::{Result, ServiceError};
use crate::service::runtime::{TaskRuntime, is_safe_relative_path};
use crate::service::supervisor::{self, TaskHandle};

const MAX_DESCRIPTION_LENGTH: usize = 1024;

/// Registry of all supervised tasks
pub struct Registry {
    tasks: RwLock<HashMap<Uuid, TaskHandle>>,
    runtime: Arc<dyn TaskRuntime>,
    config: Config,
}

impl Registry {
    pub fn new(runtime: Arc<dyn TaskRuntime>, config: Config) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            runtime,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validates a launch request and starts a supervisor for it
    ///
    /// Returns the new task, still in the `Starting` state.
    pub async fn launch(&self, req: LaunchTask) -> Result<Task> {
        validate_launch(&req, &self.config)?;

        let mut tasks = self.tasks.write().await;
        if tasks.len() >= self.config.max_tasks {
            return Err(ServiceError::ResourceExhausted(format!(
                "task limit of {} reached",
                self.config.max_tasks
            )));
        }

        let mut id = Uuid::new_v4();
        while tasks.contains_key(&id) {
            id = Uuid::new_v4();
        }

        let task = Task {
            id,
            kind: req.kind,
            state: TaskState::Starting,
            owner: req.owner,
            template_name: req.template_name,
            config: req.config,
            started_at: Utc::now(),
            terminated_at: None,
            exit: None,
        };

        let handle = supervisor::spawn(
            task.clone(),
            req.files,
            Arc::clone(&self.runtime),
            &self.config,
        );
        tasks.insert(id, handle);

        info!(task_id = %id, kind = %task.kind, owner = %task.owner, "Task launched");

        Ok(task)
    }

    /// Routes to the supervisor of task `id`
    pub async fn handle(&self, id: Uuid) -> Result<TaskHandle> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ServiceError::NotFound(id))
    }

    pub async fn get(&self, id: Uuid) -> Result<Task> {
        Ok(self.handle(id).await?.snapshot())
    }

    /// Kills task `id`; killing a task that is already stopping succeeds
    pub async fn kill(&self, id: Uuid) -> Result<()> {
        let handle = self.handle(id).await?;
        handle.kill().await?;

        info!(task_id = %id, "Task kill requested");
        Ok(())
    }

    /// Forcibly removes task `id`
    ///
    /// The task is killed if it is still live, and log streams reading it
    /// are aborted.
    pub async fn purge(&self, id: Uuid) -> Result<()> {
        let handle = self
            .tasks
            .write()
            .await
            .remove(&id)
            .ok_or(ServiceError::NotFound(id))?;

        // Readers must observe the purge before the seal caused by the kill.
        handle.logs().purge();
        if let Err(e) = handle.kill().await {
            warn!(task_id = %id, "Kill during purge failed: {}", e);
        }

        info!(
            task_id = %id,
            bridges = handle.active_bridges(),
            "Task purged"
        );
        Ok(())
    }

    /// Filters, sorts and paginates the registered tasks
    pub async fn list(&self, query: &ListTasksQuery) -> TaskPage {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .map(TaskHandle::snapshot)
            .filter(|task| matches_filter(task, query))
            .collect();

        tasks.sort_by(|a, b| {
            let by_key = compare_by(a, b, query.sort_by);
            let by_key = match query.order_by {
                OrderBy::Asc => by_key,
                OrderBy::Desc => by_key.reverse(),
            };
            by_key.then_with(|| a.id.cmp(&b.id))
        });

        let (tasks, pagination) =
            paginate(tasks, query.offset, query.limit, self.config.list_max_limit);

        TaskPage { tasks, pagination }
    }

    /// Removes terminated tasks that no log stream references any more
    ///
    /// Tasks stay visible for the configured retention after terminating.
    pub async fn reap(&self) -> usize {
        let now = Utc::now();
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::MAX);

        let mut tasks = self.tasks.write().await;
        let before = tasks.len();

        tasks.retain(|id, handle| {
            let task = handle.snapshot();
            let expired = task
                .terminated_at
                .is_some_and(|at| now.signed_duration_since(at) >= retention);
            let reapable = task.state.is_terminal() && expired && handle.active_bridges() == 0;
            if reapable {
                debug!(task_id = %id, "Reaping task");
            }
            !reapable
        });

        before - tasks.len()
    }

    /// Reaps periodically for as long as the registry is alive
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let mut ticker = tokio::time::interval(self.config.reap_interval);

        tokio::spawn(async move {
            loop {
                ticker.tick().await;

                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let reaped = registry.reap().await;
                if reaped > 0 {
                    info!("Reaped {} terminated task(s)", reaped);
                }
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }
}

fn matches_filter(task: &Task, query: &ListTasksQuery) -> bool {
    query.kind.is_none_or(|kind| task.kind == kind)
        && query.state.is_none_or(|state| task.state == state)
        && query.owner.as_ref().is_none_or(|owner| &task.owner == owner)
}

fn compare_by(a: &Task, b: &Task, sort_by: SortBy) -> Ordering {
    match sort_by {
        SortBy::Id => a.id.cmp(&b.id),
        SortBy::StartTime => a.started_at.cmp(&b.started_at),
        SortBy::Description => a.description().cmp(&b.description()),
        SortBy::State => a.state.cmp(&b.state),
        SortBy::Owner => a.owner.cmp(&b.owner),
        SortBy::Kind => a.kind.to_string().cmp(&b.kind.to_string()),
    }
}

/// Slices one page out of `items`
///
/// A negative `offset` counts from the end; an offset past the end yields an
/// empty page. `limit <= 0` uses `max_limit`, larger limits are clamped to it.
pub fn paginate<T>(
    mut items: Vec<T>,
    offset: i64,
    limit: i64,
    max_limit: usize,
) -> (Vec<T>, Pagination) {
    let total = items.len();

    let start_index = if offset < 0 {
        total.saturating_sub(usize::try_from(offset.unsigned_abs()).unwrap_or(usize::MAX))
    } else {
        usize::try_from(offset).unwrap_or(usize::MAX).min(total)
    };

    let page_size = if limit <= 0 {
        max_limit
    } else {
        usize::try_from(limit).unwrap_or(usize::MAX).min(max_limit)
    };
    let end_index = start_index.saturating_add(page_size).min(total);

    items.truncate(end_index);
    let page = items.split_off(start_index);

    let pagination = Pagination {
        offset,
        limit: page_size as i64,
        start_index,
        end_index,
        total,
    };

    (page, pagination)
}

/// Rejects malformed launch requests before any state changes
fn validate_launch(req: &LaunchTask, config: &Config) -> Result<()> {
    if req.owner.trim().is_empty() {
        return Err(ServiceError::InvalidArgument(
            "owner must not be empty".to_string(),
        ));
    }

    if req.config.slots > config.max_slots {
        return Err(ServiceError::InvalidArgument(format!(
            "requested {} slots (max: {})",
            req.config.slots, config.max_slots
        )));
    }

    if req.config.entrypoint.iter().any(|arg| arg.is_empty()) {
        return Err(ServiceError::InvalidArgument(
            "entrypoint arguments must not be empty".to_string(),
        ));
    }

    if let Some(description) = &req.config.description {
        if description.chars().count() > MAX_DESCRIPTION_LENGTH {
            return Err(ServiceError::InvalidArgument(format!(
                "description too long (max: {} chars)",
                MAX_DESCRIPTION_LENGTH
            )));
        }
    }

    let mut context_size = 0usize;
    for file in &req.files {
        if !is_safe_relative_path(Path::new(&file.path)) {
            return Err(ServiceError::InvalidArgument(format!(
                "context file path '{}' must be relative and stay inside the task directory",
                file.path
            )));
        }
        context_size = context_size.saturating_add(file.path.len() + file.content.len());
    }

    if context_size > config.max_context_size {
        return Err(ServiceError::InvalidArgument(format!(
            "context is {} bytes (max: {})",
            context_size, config.max_context_size
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::runtime::testing::ScriptedRuntime;
    use kernelhub_core::domain::task::{TaskConfig, TaskKind};
    use kernelhub_core::dto::task::ContextFile;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            max_tasks: 8,
            retention: Duration::ZERO,
            kill_grace: Duration::from_millis(200),
            ..Config::default()
        }
    }

    fn registry_with(runtime: Arc<ScriptedRuntime>, config: Config) -> Registry {
        Registry::new(runtime, config)
    }

    fn notebook_for(owner: &str) -> LaunchTask {
        LaunchTask {
            kind: TaskKind::Notebook,
            owner: owner.to_string(),
            template_name: None,
            config: TaskConfig::default(),
            files: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_launch_then_get_is_not_terminated() {
        let registry = registry_with(Arc::new(ScriptedRuntime::new()), test_config());

        let launched = registry.launch(notebook_for("alice")).await.unwrap();
        assert_eq!(launched.state, TaskState::Starting);

        let fetched = registry.get(launched.id).await.unwrap();
        assert!(matches!(
            fetched.state,
            TaskState::Starting | TaskState::Running
        ));
        assert_eq!(fetched.owner, "alice");
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let registry = registry_with(Arc::new(ScriptedRuntime::new()), test_config());
        let id = Uuid::new_v4();

        assert_eq!(registry.get(id).await, Err(ServiceError::NotFound(id)));
        assert_eq!(registry.kill(id).await, Err(ServiceError::NotFound(id)));
        assert_eq!(registry.purge(id).await, Err(ServiceError::NotFound(id)));
    }

    #[tokio::test]
    async fn test_launch_rejects_invalid_params() {
        let registry = registry_with(Arc::new(ScriptedRuntime::new()), test_config());

        let no_owner = notebook_for("  ");
        assert!(matches!(
            registry.launch(no_owner).await,
            Err(ServiceError::InvalidArgument(_))
        ));

        let mut too_many_slots = notebook_for("alice");
        too_many_slots.config.slots = 1000;
        assert!(matches!(
            registry.launch(too_many_slots).await,
            Err(ServiceError::InvalidArgument(_))
        ));

        let mut escaping_file = notebook_for("alice");
        escaping_file.files.push(ContextFile {
            path: "../../etc/cron.d/job".to_string(),
            content: String::new(),
        });
        assert!(matches!(
            registry.launch(escaping_file).await,
            Err(ServiceError::InvalidArgument(_))
        ));

        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_launch_rejects_oversized_context() {
        let config = Config {
            max_context_size: 16,
            ..test_config()
        };
        let registry = registry_with(Arc::new(ScriptedRuntime::new()), config);

        let mut req = notebook_for("alice");
        req.files.push(ContextFile {
            path: "big.txt".to_string(),
            content: "x".repeat(64),
        });

        assert!(matches!(
            registry.launch(req).await,
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_launch_beyond_capacity_is_exhausted() {
        let config = Config {
            max_tasks: 2,
            ..test_config()
        };
        let registry = registry_with(Arc::new(ScriptedRuntime::new()), config);

        registry.launch(notebook_for("alice")).await.unwrap();
        registry.launch(notebook_for("bob")).await.unwrap();

        assert!(matches!(
            registry.launch(notebook_for("carol")).await,
            Err(ServiceError::ResourceExhausted(_))
        ));
    }

    #[tokio::test]
    async fn test_kill_twice_succeeds() {
        let registry = registry_with(Arc::new(ScriptedRuntime::new()), test_config());
        let task = registry.launch(notebook_for("alice")).await.unwrap();
        let handle = registry.handle(task.id).await.unwrap();
        handle.wait_for_state(TaskState::Running).await;

        registry.kill(task.id).await.unwrap();
        registry.kill(task.id).await.unwrap();

        let task = handle.wait_for_state(TaskState::Terminated).await;
        assert_eq!(task.state, TaskState::Terminated);
        registry.kill(task.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_reap_waits_for_bridges() {
        let registry = registry_with(Arc::new(ScriptedRuntime::new()), test_config());
        let task = registry.launch(notebook_for("alice")).await.unwrap();
        let handle = registry.handle(task.id).await.unwrap();
        handle.wait_for_state(TaskState::Running).await;

        let lease = handle.lease();
        registry.kill(task.id).await.unwrap();
        handle.wait_for_state(TaskState::Terminated).await;

        assert_eq!(registry.reap().await, 0);
        assert!(registry.get(task.id).await.is_ok());

        drop(lease);
        assert_eq!(registry.reap().await, 1);
        assert_eq!(
            registry.get(task.id).await,
            Err(ServiceError::NotFound(task.id))
        );
    }

    #[tokio::test]
    async fn test_reap_keeps_live_and_retained_tasks() {
        let config = Config {
            retention: Duration::from_secs(3600),
            ..test_config()
        };
        let registry = registry_with(Arc::new(ScriptedRuntime::new()), config);

        let live = registry.launch(notebook_for("alice")).await.unwrap();
        let killed = registry.launch(notebook_for("bob")).await.unwrap();
        let handle = registry.handle(killed.id).await.unwrap();
        handle.wait_for_state(TaskState::Running).await;
        registry.kill(killed.id).await.unwrap();
        handle.wait_for_state(TaskState::Terminated).await;

        assert_eq!(registry.reap().await, 0);
        assert!(registry.get(live.id).await.is_ok());
        assert!(registry.get(killed.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_removes_and_seals() {
        let registry = registry_with(Arc::new(ScriptedRuntime::new()), test_config());
        let task = registry.launch(notebook_for("alice")).await.unwrap();
        let handle = registry.handle(task.id).await.unwrap();

        registry.purge(task.id).await.unwrap();

        assert!(handle.logs().status().purged);
        assert_eq!(
            registry.get(task.id).await,
            Err(ServiceError::NotFound(task.id))
        );
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let registry = registry_with(Arc::new(ScriptedRuntime::new()), test_config());

        let mut shell = notebook_for("bob");
        shell.kind = TaskKind::Shell;
        registry.launch(shell).await.unwrap();
        registry.launch(notebook_for("alice")).await.unwrap();
        registry.launch(notebook_for("carol")).await.unwrap();

        let notebooks = registry
            .list(&ListTasksQuery {
                kind: Some(TaskKind::Notebook),
                sort_by: SortBy::Owner,
                order_by: OrderBy::Desc,
                ..ListTasksQuery::default()
            })
            .await;
        let owners: Vec<&str> = notebooks.tasks.iter().map(|t| t.owner.as_str()).collect();
        assert_eq!(owners, vec!["carol", "alice"]);
        assert_eq!(notebooks.pagination.total, 2);

        let bobs = registry
            .list(&ListTasksQuery {
                owner: Some("bob".to_string()),
                ..ListTasksQuery::default()
            })
            .await;
        assert_eq!(bobs.tasks.len(), 1);
        assert_eq!(bobs.tasks[0].kind, TaskKind::Shell);
    }

    #[tokio::test]
    async fn test_list_ties_are_broken_by_id() {
        let registry = registry_with(Arc::new(ScriptedRuntime::new()), test_config());
        for _ in 0..5 {
            registry.launch(notebook_for("alice")).await.unwrap();
        }

        let page = registry
            .list(&ListTasksQuery {
                sort_by: SortBy::Owner,
                ..ListTasksQuery::default()
            })
            .await;
        let ids: Vec<Uuid> = page.tasks.iter().map(|t| t.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn test_list_offset_past_end_is_empty() {
        let registry = registry_with(Arc::new(ScriptedRuntime::new()), test_config());
        for owner in ["a", "b", "c"] {
            registry.launch(notebook_for(owner)).await.unwrap();
        }

        for limit in [0, 1, 2, 50] {
            for offset in [3, 4, 100] {
                let page = registry
                    .list(&ListTasksQuery {
                        offset,
                        limit,
                        ..ListTasksQuery::default()
                    })
                    .await;
                assert!(page.tasks.is_empty());
                assert_eq!(page.pagination.total, 3);
            }
        }
    }

    #[test]
    fn test_paginate_windows() {
        let items: Vec<u32> = (0..10).collect();

        let (page, pagination) = paginate(items.clone(), 2, 3, 100);
        assert_eq!(page, vec![2, 3, 4]);
        assert_eq!(pagination.start_index, 2);
        assert_eq!(pagination.end_index, 5);
        assert_eq!(pagination.total, 10);

        let (page, pagination) = paginate(items.clone(), 0, 0, 4);
        assert_eq!(page, vec![0, 1, 2, 3]);
        assert_eq!(pagination.limit, 4);

        let (page, _) = paginate(items.clone(), 0, -1, 4);
        assert_eq!(page.len(), 4);

        let (page, _) = paginate(items.clone(), 0, 1000, 5);
        assert_eq!(page.len(), 5);

        let (page, pagination) = paginate(items.clone(), -3, 10, 100);
        assert_eq!(page, vec![7, 8, 9]);
        assert_eq!(pagination.start_index, 7);

        let (page, pagination) = paginate(items, -30, 2, 100);
        assert_eq!(page, vec![0, 1]);
        assert_eq!(pagination.start_index, 0);
    }
}
