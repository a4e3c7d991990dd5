//! ClearML API payloads
//!
//! Responses are deserialized leniently: ClearML omits or nulls most task
//! fields depending on server version and task state.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ============================================================================
// ENVELOPES
// ============================================================================

/// Every ClearML response wraps its payload in `{"meta": ..., "data": ...}`
#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AuthResponse {
    #[serde(default)]
    pub data: Option<AuthData>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AuthData {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ProjectsData {
    #[serde(default)]
    pub projects: Vec<Project>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TasksData {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

// ============================================================================
// ENTITIES
// ============================================================================

/// Reference to another entity; ClearML sends either a bare id or `{id, name}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn id_ref<'de, D>(deserializer: D) -> Result<Option<IdRef>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Id(String),
        Ref(IdRef),
    }

    Ok(match Option::<Repr>::deserialize(deserializer)? {
        Some(Repr::Id(id)) => Some(IdRef { id, name: None }),
        Some(Repr::Ref(r)) => Some(r),
        None => None,
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// One hyperparameter entry (`hyperparams.<section>.<name>`)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParamItem {
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, rename = "type")]
    pub param_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    #[serde(default, deserialize_with = "id_ref")]
    pub queue: Option<IdRef>,
    #[serde(default)]
    pub parameters: Option<BTreeMap<String, Value>>,
}

/// A ClearML task snapshot. Interactive sessions are tasks too.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub status_reason: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub started: Option<String>,
    #[serde(default)]
    pub last_update: Option<String>,
    #[serde(default, deserialize_with = "id_ref")]
    pub project: Option<IdRef>,
    #[serde(default, deserialize_with = "id_ref")]
    pub user: Option<IdRef>,
    #[serde(default)]
    pub execution: Option<Execution>,
    #[serde(default)]
    pub hyperparams: Option<BTreeMap<String, BTreeMap<String, ParamItem>>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub system_tags: Vec<String>,
}

impl Task {
    /// First 8 characters of the id, as shown in session lists
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(8) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project.as_ref().map(|p| p.id.as_str())
    }

    pub fn queue_id(&self) -> Option<&str> {
        self.execution
            .as_ref()
            .and_then(|e| e.queue.as_ref())
            .map(|q| q.id.as_str())
    }

    pub fn comment(&self) -> &str {
        self.comment.as_deref().unwrap_or_default()
    }

    /// `hyperparams.<section>.<name>.value`
    pub fn hyperparam(&self, section: &str, name: &str) -> Option<&str> {
        self.hyperparams
            .as_ref()?
            .get(section)?
            .get(name)?
            .value
            .as_deref()
    }

    /// Address clearml-session publishes for reaching the container
    pub fn external_address(&self) -> Option<&str> {
        self.hyperparam("properties", "external_address")
            .filter(|a| !a.is_empty())
    }

    /// Labelled rows describing the session
    pub fn details(&self) -> Vec<(&'static str, String)> {
        let mut rows = vec![
            ("Task ID", self.id.clone()),
            ("Status", self.status.clone()),
            ("Comment", self.comment().to_string()),
        ];
        if let Some(project) = self.project_id() {
            rows.push(("Project ID", project.to_string()));
        }
        if let Some(queue) = self.queue_id() {
            rows.push(("Queue ID", queue.to_string()));
        }
        if let Some(address) = self.external_address() {
            rows.push(("External Address", address.to_string()));
        }
        if let Some(started) = &self.started {
            rows.push(("Started", started.clone()));
        }
        if let Some(updated) = &self.last_update {
            rows.push(("Last Update", updated.clone()));
        }
        rows
    }
}

// ============================================================================
// TASK LOGS
// ============================================================================

/// One console log event
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LogEvent {
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub worker: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
}

/// `events.get_task_log` payload
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskLogData {
    #[serde(default)]
    pub events: Vec<LogEvent>,
    #[serde(default)]
    pub returned: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

impl TaskLogData {
    /// Messages in retrieval order, joined by a single space
    pub fn concatenated(&self) -> String {
        self.events
            .iter()
            .map(|e| e.msg.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOrder {
    Asc,
    Desc,
}

/// `events.get_task_log` request
///
/// `navigate_earlier` defaults to `true` server-side: newest events first,
/// counting back from `from_timestamp` (or the latest event).
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TaskLogRequest {
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigate_earlier: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<LogOrder>,
}

impl TaskLogRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_from_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.from_timestamp = Some(timestamp_ms);
        self
    }

    pub fn with_navigate_earlier(mut self, navigate_earlier: bool) -> Self {
        self.navigate_earlier = Some(navigate_earlier);
        self
    }

    pub fn with_order(mut self, order: LogOrder) -> Self {
        self.order = Some(order);
        self
    }
}

/// `tasks.get_all_ex` filters; all optional, combined conjunctively by the server
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TaskFilter {
    #[serde(rename = "project", skip_serializing_if = "Option::is_none")]
    pub project_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "status", skip_serializing_if = "Option::is_none")]
    pub statuses: Option<Vec<String>>,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project_ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.project_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.statuses = Some(statuses.into_iter().map(Into::into).collect());
        self
    }
}
