//! Checkpoints, backups, validation, and corruption recovery for the
//! state store.
//!
//! A checkpoint is a point-in-time copy of `plan.md`, `tasks.json`,
//! `status.json`, the `tasks/` directory, and the `results/` directory,
//! plus a `metadata.json`. Backups have the same shape but live under the
//! backup root; one is always taken before a checkpoint restore.

use super::store::StateStore;
use crate::errors::OrchestratorError;
use crate::models::{CheckpointMetadata, ValidationReport};
use crate::util::{now_compact, now_iso};
use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const STATE_FILES: [&str; 3] = ["plan.md", "tasks.json", "status.json"];
const STATE_DIRS: [&str; 2] = ["tasks", "results"];

impl StateStore {
    /// Create a named checkpoint (timestamped name by default). Returns
    /// the checkpoint name.
    pub fn create_checkpoint(&self, name: Option<&str>) -> Result<String> {
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("checkpoint_{}", now_compact()),
        };
        let checkpoint_dir = self.state_dir().join("checkpoints").join(&name);
        self.copy_state_into(&checkpoint_dir)?;

        let metadata = CheckpointMetadata {
            checkpoint_name: name.clone(),
            created_at: now_iso(),
            files: STATE_FILES.iter().map(|s| s.to_string()).collect(),
        };
        let content = serde_json::to_string_pretty(&metadata)?;
        fs::write(checkpoint_dir.join("metadata.json"), content)
            .context("Failed to write checkpoint metadata")?;
        info!(checkpoint = %name, "checkpoint created");
        Ok(name)
    }

    /// Restore live state from a checkpoint, after writing a
    /// `pre_restore_<timestamp>` backup of the current state.
    pub fn restore_checkpoint(&self, name: &str) -> Result<()> {
        let checkpoint_dir = self.state_dir().join("checkpoints").join(name);
        if !checkpoint_dir.exists() {
            bail!(OrchestratorError::StateMissing(format!(
                "checkpoint not found: {name}"
            )));
        }
        if !checkpoint_dir.join("metadata.json").exists() {
            bail!(OrchestratorError::StateMissing(format!(
                "checkpoint metadata not found: {name}"
            )));
        }

        self.create_backup(Some(&format!("pre_restore_{}", now_compact())))?;
        self.copy_state_from(&checkpoint_dir)?;
        info!(checkpoint = name, "checkpoint restored");
        Ok(())
    }

    /// Create a backup under the backup root. Returns the backup name.
    pub fn create_backup(&self, name: Option<&str>) -> Result<String> {
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("backup_{}", now_compact()),
        };
        self.copy_state_into(&self.backup_dir().join(&name))?;
        info!(backup = %name, "backup created");
        Ok(name)
    }

    /// All checkpoints with readable metadata, newest first. Checkpoints
    /// with unreadable metadata are skipped.
    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointMetadata>> {
        let checkpoints_dir = self.state_dir().join("checkpoints");
        let mut checkpoints = Vec::new();
        if !checkpoints_dir.exists() {
            return Ok(checkpoints);
        }
        for entry in fs::read_dir(&checkpoints_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let metadata_file = path.join("metadata.json");
            let Ok(content) = fs::read_to_string(&metadata_file) else {
                continue;
            };
            match serde_json::from_str::<CheckpointMetadata>(&content) {
                Ok(metadata) => checkpoints.push(metadata),
                Err(e) => warn!(path = %metadata_file.display(), error = %e, "skipping checkpoint"),
            }
        }
        checkpoints.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(checkpoints)
    }

    /// Validate the state directory. Missing required files are warnings
    /// (the driver can bootstrap them); corrupt files and a `tasks.json`
    /// without a `tasks` key are errors.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        for name in ["tasks.json", "status.json"] {
            let path = self.state_dir().join(name);
            if !path.exists() {
                report.warning(format!("File not found: {name}"));
                continue;
            }
            match self.read_json::<Value>(name) {
                Ok(Some(doc)) => {
                    if name == "tasks.json" && doc.get("tasks").is_none() {
                        report.error("tasks.json missing 'tasks' key");
                    }
                }
                Ok(None) => {}
                Err(e) => report.error(format!("Corrupted file: {name} - {e}")),
            }
        }
        report
    }

    /// Try to restore state from the newest checkpoint; on failure, from
    /// the newest backup. Returns whether recovery succeeded.
    pub fn recover_from_corruption(&self) -> bool {
        if let Ok(checkpoints) = self.list_checkpoints()
            && let Some(latest) = checkpoints.first()
        {
            match self.restore_checkpoint(&latest.checkpoint_name.clone()) {
                Ok(()) => return true,
                Err(e) => warn!(error = %e, "checkpoint restore failed, trying backups"),
            }
        }

        match self.latest_backup() {
            Some(backup_dir) => match self.copy_state_from(&backup_dir) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "backup restore failed");
                    false
                }
            },
            None => false,
        }
    }

    fn latest_backup(&self) -> Option<std::path::PathBuf> {
        let mut backups: Vec<(std::time::SystemTime, std::path::PathBuf)> =
            fs::read_dir(self.backup_dir())
                .ok()?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .filter_map(|p| {
                    let mtime = p.metadata().and_then(|m| m.modified()).ok()?;
                    Some((mtime, p))
                })
                .collect();
        backups.sort_by(|a, b| b.0.cmp(&a.0));
        backups.into_iter().next().map(|(_, p)| p)
    }

    fn copy_state_into(&self, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest)
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        for name in STATE_FILES {
            let source = self.state_dir().join(name);
            if source.exists() {
                fs::copy(&source, dest.join(name))
                    .with_context(|| format!("Failed to copy {name}"))?;
            }
        }
        for name in STATE_DIRS {
            let source = self.state_dir().join(name);
            if source.exists() {
                replace_dir(&source, &dest.join(name))?;
            }
        }
        Ok(())
    }

    fn copy_state_from(&self, source_dir: &Path) -> Result<()> {
        for name in STATE_FILES {
            let source = source_dir.join(name);
            if source.exists() {
                fs::copy(&source, self.state_dir().join(name))
                    .with_context(|| format!("Failed to restore {name}"))?;
            }
        }
        for name in STATE_DIRS {
            let source = source_dir.join(name);
            if source.exists() {
                replace_dir(&source, &self.state_dir().join(name))?;
            }
        }
        Ok(())
    }
}

/// Replace `dest` with a recursive copy of `source`.
fn replace_dir(source: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)
            .with_context(|| format!("Failed to clear {}", dest.display()))?;
    }
    copy_dir_recursive(source, dest)
}

fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}
