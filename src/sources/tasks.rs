//! Task source backed by a CalDAV bridge service
//!
//! Fetches every configured task list, merges the items into one ordered
//! list, and caches the result on disk. Ordering puts dated work first and
//! urgent work ahead of routine work; the degraded-but-served behavior
//! mirrors the calendar source.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::cache::{keys, FileCache};
use crate::sources::{Served, TaskItem, TaskStatus, TasksView};

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur when fetching task data
#[derive(Error, Debug)]
pub enum TasksError {
    /// No task lists are configured
    #[error("no task lists configured")]
    NoCollections,
    /// Network request failed
    #[error("Tasks request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// The bridge returned a non-success status
    #[error("Tasks server returned HTTP {0}")]
    BadStatus(reqwest::StatusCode),
    /// Failed to parse the bridge response
    #[error("Failed to parse task data: {0}")]
    ParseError(#[from] serde_json::Error),
    /// Every configured task list failed to load
    #[error("all {total} task lists failed to load")]
    AllCollectionsFailed { total: usize },
    /// Some task lists failed while others loaded
    #[error("{failed} of {total} task lists failed to load")]
    PartialFailure { failed: usize, total: usize },
}

/// A single task as returned by the bridge.
///
/// `priority` carries the raw CalDAV value where 1 is the most urgent and 9
/// the least, with 0 meaning unset.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub due: Option<NaiveDate>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TasksResponse {
    #[serde(default)]
    tasks: Vec<RemoteTask>,
}

/// Source of tasks for a named task list
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn fetch_tasks(&self, collection: &str) -> Result<Vec<RemoteTask>, TasksError>;
}

/// Task source that talks to the CalDAV bridge over HTTP
pub struct HttpTaskSource {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpTaskSource {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl TaskSource for HttpTaskSource {
    async fn fetch_tasks(&self, collection: &str) -> Result<Vec<RemoteTask>, TasksError> {
        let url = format!(
            "{}/tasklists/{}/tasks",
            self.base_url.trim_end_matches('/'),
            collection
        );

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TasksError::BadStatus(response.status()));
        }

        let body = response.text().await?;
        let parsed: TasksResponse = serde_json::from_str(&body)?;
        Ok(parsed.tasks)
    }
}

/// Aggregates tasks from every configured list with disk-backed caching
pub struct TaskService<S: TaskSource> {
    source: S,
    cache: FileCache,
    ttl: Duration,
    collections: Vec<String>,
}

impl<S: TaskSource> TaskService<S> {
    /// Creates a new task service.
    ///
    /// # Arguments
    /// * `source` - Where tasks come from
    /// * `cache` - Cache used for the merged list and stale fallback
    /// * `ttl` - How long a cached list stays fresh
    /// * `collections` - Task list names to aggregate
    pub fn new(source: S, cache: FileCache, ttl: Duration, collections: Vec<String>) -> Self {
        Self {
            source,
            cache,
            ttl,
            collections,
        }
    }

    /// Fetches the merged task list, serving from cache when fresh.
    ///
    /// Task lists are fetched concurrently. A subset failing degrades the
    /// result; all of them failing falls back to any cached copy and is only
    /// fatal when none exists.
    pub async fn fetch(&self) -> Result<Served<TasksView, TasksError>, TasksError> {
        let key = keys::tasks_items();

        if let Ok(Some(cached)) = self.cache.read_typed::<TasksView>(key, self.ttl) {
            if !cached.is_stale {
                return Ok(Served::fresh(cached.data));
            }
        }

        if self.collections.is_empty() {
            return Err(TasksError::NoCollections);
        }

        let fetches = self.collections.iter().map(|name| {
            let source = &self.source;
            async move { source.fetch_tasks(name).await }
        });
        let results = futures::future::join_all(fetches).await;

        let total = self.collections.len();
        let mut failed = 0;
        let mut remote = Vec::new();
        for result in results {
            match result {
                Ok(tasks) => remote.extend(tasks),
                Err(_) => failed += 1,
            }
        }

        if remote.is_empty() && failed > 0 {
            let err = TasksError::AllCollectionsFailed { total };
            if let Ok(Some(cached)) = self.cache.read_typed::<TasksView>(key, Duration::zero()) {
                return Ok(Served::degraded(cached.data, err));
            }
            return Err(err);
        }

        let now = Utc::now();
        let mut items: Vec<TaskItem> = remote
            .into_iter()
            .map(|task| normalize_task(task, now))
            .collect();
        sort_tasks(&mut items);

        let view = TasksView { items };
        let meta = HashMap::from([("source".to_string(), "tasks_all".to_string())]);
        let _ = self.cache.write(key, &view, meta);

        if failed > 0 {
            Ok(Served::degraded(
                view,
                TasksError::PartialFailure { failed, total },
            ))
        } else {
            Ok(Served::fresh(view))
        }
    }
}

/// Folds the raw 0-9 CalDAV priority into the view's 1-3 urgency scale.
///
/// Raw 1-3 is urgent (3), 4-6 is normal (2), 7-9 is low (1). Unset or
/// out-of-range values count as normal.
fn normalize_priority(raw: u8) -> u8 {
    match raw {
        1..=3 => 3,
        4..=6 => 2,
        7..=9 => 1,
        _ => 2,
    }
}

/// Converts a remote task into the view shape.
///
/// `now` stands in for a missing creation time so one aggregation pass
/// stamps every such task identically.
fn normalize_task(task: RemoteTask, now: DateTime<Utc>) -> TaskItem {
    TaskItem {
        id: task.id,
        title: task.title,
        notes: task.notes.unwrap_or_default(),
        status: if task.completed {
            TaskStatus::Completed
        } else {
            TaskStatus::NeedsAction
        },
        due_date: task.due,
        priority: normalize_priority(task.priority),
        created_at: task.created_at.unwrap_or(now),
    }
}

/// Orders tasks by due date, then urgency, then age.
///
/// Dated tasks come before undated ones, nearer due dates first. Ties go to
/// the higher priority, then the older task. The sort is stable, so tasks
/// that compare equal keep their fetch order.
fn sort_tasks(items: &mut [TaskItem]) {
    items.sort_by(|a, b| {
        let by_due = match (a.due_date, b.due_date) {
            (Some(a_due), Some(b_due)) => a_due.cmp(&b_due),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_due
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}
