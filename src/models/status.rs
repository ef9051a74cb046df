//! Loop-wide status, checkpoint metadata, and state validation verdicts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `status.json` singleton. Known fields are typed; whatever else the
/// Judge verdict carries rides along in `extra` so no signal is dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusFile {
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_iteration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_continue: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_detected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_planner_run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_worker_run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_judge_run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_plan_judge_run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_plan_judge_decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_plan_judge_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_plan_judge_feedback: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tasks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_tasks: Option<usize>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl StatusFile {
    /// Whether the Judge has asked the loop to keep going. Absent means
    /// yes — a fresh state must not stop the loop before the first verdict.
    pub fn should_continue(&self) -> bool {
        self.should_continue.unwrap_or(true)
    }
}

/// Metadata written next to every checkpoint and backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub checkpoint_name: String,
    pub created_at: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Result of validating the state directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}
