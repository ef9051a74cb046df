//! Task records and the lightweight task index.
//!
//! Status lives only in per-task files under `tasks/<id>.json`; the index
//! (`tasks.json`) holds immutable headers plus the id counter. That split
//! keeps Worker writes off the shared index entirely.

use crate::util::now_iso;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task. `Completed` and `Failed` are terminal;
/// crash recovery is the only path back from `InProgress` to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Unknown strings decode as `Pending`, matching the store's treatment
    /// of index-only tasks as freshly created.
    pub fn from_str_lenient(value: &str) -> Self {
        match value {
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Legal transitions: pending→in_progress, in_progress→completed,
    /// in_progress→failed, and in_progress→pending (recovery only).
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
                | (Self::InProgress, Self::Pending)
        )
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_str_lenient(&s))
    }
}

/// Task priority. Unknown strings decode as `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn from_str_lenient(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }

    /// Numeric score for scheduling (higher runs first).
    pub fn score(&self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }
}

impl Serialize for TaskPriority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskPriority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_str_lenient(&s))
    }
}

/// Outcome attached to a completed task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    #[serde(default)]
    pub report: String,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
}

fn default_true() -> bool {
    true
}

impl TaskResult {
    pub fn new(report: impl Into<String>) -> Self {
        Self {
            report: report.into(),
            success: true,
            error_message: None,
            commit_hash: None,
            commit_message: None,
        }
    }
}

/// Full durable task record, one file per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "estimated_hours_is_zero")]
    pub estimated_hours: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_reason: Option<String>,
}

fn estimated_hours_is_zero(hours: &f64) -> bool {
    *hours == 0.0
}

impl Task {
    /// A task known only from its index header is treated as freshly
    /// created: pending, no description, no lifecycle history.
    pub fn from_index_entry(entry: &TaskIndexEntry) -> Self {
        Self {
            id: entry.id.clone(),
            title: entry.title.clone(),
            description: String::new(),
            priority: entry.priority,
            status: TaskStatus::Pending,
            created_at: entry.created_at.clone(),
            updated_at: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
            assigned_to: None,
            result: None,
            result_file: None,
            error: None,
            files: Vec::new(),
            dependencies: Vec::new(),
            estimated_hours: 0.0,
            recovered_at: None,
            recovery_reason: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == TaskStatus::InProgress
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }
}

/// Fields the Planner supplies for a brand-new task. The store assigns
/// id, status, and created_at.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub estimated_hours: f64,
}

/// Immutable header row in `tasks.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIndexEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// The `tasks.json` document: append-only headers plus the id counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksFile {
    #[serde(default)]
    pub tasks: Vec<TaskIndexEntry>,
    #[serde(default = "default_next_task_id")]
    pub next_task_id: u64,
    #[serde(default)]
    pub version: u64,
}

fn default_next_task_id() -> u64 {
    1
}

impl Default for TasksFile {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            next_task_id: 1,
            version: 0,
        }
    }
}

impl TasksFile {
    pub fn entry(&self, task_id: &str) -> Option<&TaskIndexEntry> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn has_task(&self, task_id: &str) -> bool {
        self.entry(task_id).is_some()
    }

    /// Allocate the next id and append the header row. Returns the id.
    pub fn allocate(&mut self, title: &str, priority: TaskPriority) -> String {
        let id = format!("task_{:03}", self.next_task_id);
        self.tasks.push(TaskIndexEntry {
            id: id.clone(),
            title: title.to_string(),
            priority,
            created_at: Some(now_iso()),
        });
        self.next_task_id += 1;
        id
    }
}

/// Categorized task counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskStatistics {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub in_progress: usize,
}

impl TaskStatistics {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        Self {
            total: tasks.len(),
            completed: tasks.iter().filter(|t| t.is_completed()).count(),
            failed: tasks.iter().filter(|t| t.is_failed()).count(),
            pending: tasks.iter().filter(|t| t.is_pending()).count(),
            in_progress: tasks.iter().filter(|t| t.is_in_progress()).count(),
        }
    }
}
