//! Persists intent records, one YAML document per task, under
//! `intents/` in the state directory.

use crate::models::Intent;
use crate::util::now_iso;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub struct IntentTracker {
    intents_dir: PathBuf,
}

impl IntentTracker {
    pub fn new(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let intents_dir = state_dir.into().join("intents");
        fs::create_dir_all(&intents_dir).context("Failed to create intents directory")?;
        Ok(Self { intents_dir })
    }

    fn intent_path(&self, task_id: &str) -> PathBuf {
        self.intents_dir.join(format!("intent_{task_id}.yaml"))
    }

    /// Save an intent record, stamping `updated_at`. Overwrites any
    /// previous record for the task.
    pub fn save(&self, intent: &Intent) -> Result<PathBuf> {
        let mut intent = intent.clone();
        intent.updated_at = Some(now_iso());
        let path = self.intent_path(&intent.task_id);
        let yaml = serde_yaml::to_string(&intent).context("Failed to serialize intent")?;
        fs::write(&path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn get(&self, task_id: &str) -> Result<Option<Intent>> {
        let path = self.intent_path(task_id);
        if !path.exists() {
            return Ok(None);
        }
        let content =
            fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let intent = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(intent))
    }

    /// All intents, newest first. Unreadable records are skipped.
    pub fn all(&self) -> Vec<Intent> {
        let Ok(entries) = fs::read_dir(&self.intents_dir) else {
            return Vec::new();
        };
        let mut intents: Vec<Intent> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("intent_") && n.ends_with(".yaml"))
            })
            .filter_map(|p| match fs::read_to_string(&p) {
                Ok(content) => serde_yaml::from_str(&content).ok(),
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "skipping unreadable intent");
                    None
                }
            })
            .collect();
        intents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        intents
    }

    /// Append a commit to an existing intent, deduplicated by hash.
    /// Returns false when no intent exists for the task.
    pub fn add_commit(&self, task_id: &str, hash: &str, message: Option<&str>) -> Result<bool> {
        let Some(mut intent) = self.get(task_id)? else {
            return Ok(false);
        };
        if intent.add_commit(hash, message) {
            self.save(&intent)?;
        }
        Ok(true)
    }

    /// Link an ADR number to a task's intent.
    pub fn link_adr(&self, task_id: &str, adr_number: &str) -> Result<bool> {
        let Some(mut intent) = self.get(task_id)? else {
            return Ok(false);
        };
        intent.related_adr = Some(adr_number.to_string());
        self.save(&intent)?;
        Ok(true)
    }

    pub fn by_adr(&self, adr_number: &str) -> Vec<Intent> {
        self.all()
            .into_iter()
            .filter(|i| i.related_adr.as_deref() == Some(adr_number))
            .collect()
    }

    /// Case-insensitive keyword search over goal and rationale.
    pub fn search(&self, keyword: &str) -> Vec<Intent> {
        let keyword = keyword.to_lowercase();
        self.all()
            .into_iter()
            .filter(|i| {
                let goal = i.intent.goal.as_deref().unwrap_or("").to_lowercase();
                let rationale = i.intent.rationale.as_deref().unwrap_or("").to_lowercase();
                goal.contains(&keyword) || rationale.contains(&keyword)
            })
            .collect()
    }
}
