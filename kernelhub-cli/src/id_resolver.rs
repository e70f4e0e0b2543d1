//! ID resolver module
//!
//! Resolves UUID prefixes to full UUIDs by querying the API, so users can
//! type short, unambiguous prefixes instead of full UUIDs.

use anyhow::{Context, Result, anyhow};
use kernelhub_client::KernelhubClient;
use kernelhub_core::dto::task::ListTasksQuery;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a task ID or prefix to a full UUID
///
/// If the input is already a full UUID, returns it immediately.
/// Otherwise, walks every page of the task listing looking for the prefix.
///
/// # Errors
/// Returns an error if no task or more than one task matches the prefix, or
/// if the API call fails.
pub async fn resolve_task_id(client: &KernelhubClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let prefix = id_or_prefix.as_str().to_lowercase();
    let mut ids = Vec::new();
    let mut query = ListTasksQuery::default();

    loop {
        let page = client
            .list_tasks(&query)
            .await
            .context("Failed to fetch tasks for ID resolution")?;

        ids.extend(page.tasks.iter().map(|task| task.id));

        let pagination = page.pagination;
        if page.tasks.is_empty() || pagination.end_index >= pagination.total {
            break;
        }
        query.offset = pagination.end_index as i64;
    }

    match_prefix(&prefix, &ids)
}

fn match_prefix(prefix: &str, ids: &[Uuid]) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids
        .iter()
        .copied()
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No task found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple tasks: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
