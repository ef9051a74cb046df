//! Change-intent records: the structured "why" behind a Worker's change,
//! persisted one YAML document per task.

use crate::util::now_iso;
use serde::{Deserialize, Serialize};

/// The intent body: goal, rationale, and the bulleted sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IntentBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default)]
    pub expected_change: Vec<String>,
    #[serde(default)]
    pub non_goals: Vec<String>,
    #[serde(default)]
    pub risk: Vec<String>,
}

/// A commit reference attached to an intent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRef {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// One intent record per task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intent {
    #[serde(default = "default_version")]
    pub version: u32,
    pub task_id: String,
    #[serde(default)]
    pub intent: IntentBody,
    #[serde(default)]
    pub commits: Vec<CommitRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_adr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

fn default_version() -> u32 {
    1
}

impl Intent {
    pub fn new(task_id: impl Into<String>) -> Self {
        let now = now_iso();
        Self {
            version: 1,
            task_id: task_id.into(),
            intent: IntentBody::default(),
            commits: Vec::new(),
            related_adr: None,
            created_at: Some(now.clone()),
            updated_at: Some(now),
        }
    }

    /// Record a commit unless its hash is already present. Returns whether
    /// the record changed.
    pub fn add_commit(&mut self, hash: &str, message: Option<&str>) -> bool {
        if self.commits.iter().any(|c| c.hash == hash) {
            return false;
        }
        self.commits.push(CommitRef {
            hash: hash.to_string(),
            message: message.map(str::to_string),
            timestamp: Some(now_iso()),
        });
        self.updated_at = Some(now_iso());
        true
    }
}
