//! Task operations exposed to the AI function-calling layer.
//!
//! The assistant holds no state of its own: every call goes through the
//! [`TaskRepository`] and therefore the same cache, dedup guard and stores
//! the UI uses. Calls arrive either as typed method calls or by name with
//! JSON arguments through [`TaskAssistant::call`].

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::models::{TaskCategory, TaskDraft, TaskPatch, TaskRecord};
use crate::repository::TaskRepository;

/// Source tag stamped on tasks the assistant creates.
pub const ASSISTANT_SOURCE: &str = "assistant";

/// Longest range `query_tasks` accepts, in days.
pub const MAX_QUERY_DAYS: u32 = 366;

#[derive(Debug, Deserialize)]
struct CreateTasksArgs {
    tasks: Vec<TaskDraft>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryTasksArgs {
    date: NaiveDate,
    #[serde(default = "default_range_days")]
    range_days: u32,
    #[serde(default)]
    category: Option<TaskCategory>,
    #[serde(default)]
    is_done: Option<bool>,
}

fn default_range_days() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct UpdateTaskArgs {
    id: String,
    #[serde(default)]
    patch: TaskPatch,
}

#[derive(Debug, Deserialize)]
struct DeleteTaskArgs {
    id: String,
}

pub struct TaskAssistant {
    tasks: Arc<TaskRepository>,
    user_id: String,
}

impl TaskAssistant {
    pub fn new(tasks: Arc<TaskRepository>, user_id: impl Into<String>) -> Self {
        Self {
            tasks,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Create every draft, marked as machine-generated.
    pub async fn create_tasks(&self, drafts: Vec<TaskDraft>) -> Result<Vec<TaskRecord>> {
        let mut created = Vec::with_capacity(drafts.len());
        for mut draft in drafts {
            draft.is_ai_generated = true;
            if draft.source.is_none() {
                draft.source = Some(ASSISTANT_SOURCE.to_string());
            }
            created.push(self.tasks.create_task(&self.user_id, draft).await?);
        }
        Ok(created)
    }

    /// Tasks on `range_days` consecutive days starting at `date` (at least
    /// one day, at most [`MAX_QUERY_DAYS`]), optionally filtered, sorted by
    /// date then time.
    pub async fn query_tasks(
        &self,
        date: NaiveDate,
        range_days: u32,
        category: Option<TaskCategory>,
        is_done: Option<bool>,
    ) -> Result<Vec<TaskRecord>> {
        if range_days > MAX_QUERY_DAYS {
            return Err(SyncError::InvalidFormat(format!(
                "range of {} days exceeds the {} day limit",
                range_days, MAX_QUERY_DAYS
            )));
        }
        let end = date
            .checked_add_days(Days::new(u64::from(range_days.max(1) - 1)))
            .ok_or_else(|| SyncError::InvalidFormat(format!("range starting {} runs past the calendar", date)))?;
        let mut tasks: Vec<TaskRecord> = self
            .tasks
            .tasks_in_range(&self.user_id, date, end)
            .await?
            .into_iter()
            .filter(|t| category.map_or(true, |c| t.category == c))
            .filter(|t| is_done.map_or(true, |d| t.is_done == d))
            .collect();
        tasks.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.schedule_cmp(b)));
        Ok(tasks)
    }

    /// Apply a partial update. `None` when no task has this id.
    pub async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Option<TaskRecord>> {
        self.tasks.patch_task(&self.user_id, id, &patch).await
    }

    /// Delete by id. False when no task has this id.
    pub async fn delete_task(&self, id: &str) -> Result<bool> {
        self.tasks.delete_task(&self.user_id, id).await
    }

    /// Dispatch a function call by name with JSON arguments.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value> {
        debug!(user_id = %self.user_id, function = name, "Assistant call");
        match name {
            "create_tasks" => {
                let args: CreateTasksArgs = parse_args(name, arguments)?;
                to_value(self.create_tasks(args.tasks).await?)
            }
            "query_tasks" => {
                let args: QueryTasksArgs = parse_args(name, arguments)?;
                let tasks = self
                    .query_tasks(args.date, args.range_days, args.category, args.is_done)
                    .await?;
                to_value(tasks)
            }
            "update_task" => {
                let args: UpdateTaskArgs = parse_args(name, arguments)?;
                to_value(self.update_task(&args.id, args.patch).await?)
            }
            "delete_task" => {
                let args: DeleteTaskArgs = parse_args(name, arguments)?;
                Ok(json!({ "deleted": self.delete_task(&args.id).await? }))
            }
            other => Err(SyncError::NotAllowed(format!("unknown assistant function '{}'", other))),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(name: &str, arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| SyncError::InvalidFormat(format!("arguments for {}: {}", name, e)))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| SyncError::encode("assistant result", e))
}
