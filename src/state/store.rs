//! The state store: crash-consistent JSON documents and text blobs under
//! `state_dir`.
//!
//! Concurrency contract: `tasks.json` and `status.json` are multi-writer
//! and go through `mutate_json` (optimistic versioning with bounded
//! retry). Per-task files under `tasks/` have exactly one writer at a
//! time by scheduling design, so they are written directly — atomically,
//! but without version control.

use crate::errors::OrchestratorError;
use crate::models::{
    NewTask, StatusFile, Task, TaskResult, TaskStatistics, TaskStatus, TasksFile,
};
use crate::util::now_iso;
use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Documents that carry an optimistic-concurrency version counter.
pub trait Versioned {
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

impl Versioned for TasksFile {
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Versioned for StatusFile {
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Read-only snapshot handed to role prompts.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub plan: String,
    pub tasks: TasksFile,
    pub status: StatusFile,
}

const MUTATE_MAX_ATTEMPTS: u32 = 5;
const MUTATE_BASE_BACKOFF: Duration = Duration::from_millis(100);

pub struct StateStore {
    state_dir: PathBuf,
    backup_dir: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            state_dir: state_dir.into(),
            backup_dir: backup_dir.into(),
        };
        fs::create_dir_all(&store.state_dir).context("Failed to create state directory")?;
        fs::create_dir_all(&store.backup_dir).context("Failed to create backup directory")?;
        for sub in ["results", "checkpoints", "tasks"] {
            fs::create_dir_all(store.state_dir.join(sub))
                .with_context(|| format!("Failed to create state subdirectory {sub}"))?;
        }
        Ok(store)
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    // ---------------------------------------------------------------
    // Raw document access
    // ---------------------------------------------------------------

    /// Read a JSON document. Absent file is `None`; malformed content is
    /// a state-corruption error.
    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.state_dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let doc = serde_json::from_str(&content).map_err(|e| {
            anyhow::Error::new(OrchestratorError::StateCorruption {
                filename: name.to_string(),
                source: Some(Box::new(e)),
            })
        })?;
        Ok(Some(doc))
    }

    /// Atomically replace a JSON document: temp file in the same
    /// directory, flush, fsync, rename over the target.
    pub fn write_json<T: Serialize>(&self, name: &str, doc: &T) -> Result<()> {
        let content =
            serde_json::to_string_pretty(doc).with_context(|| format!("Failed to serialize {name}"))?;
        atomic_write(&self.state_dir.join(name), content.as_bytes())
    }

    pub fn read_text(&self, name: &str) -> Result<String> {
        let path = self.state_dir.join(name);
        if !path.exists() {
            return Ok(String::new());
        }
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
    }

    pub fn write_text(&self, name: &str, content: &str) -> Result<()> {
        let path = self.state_dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        atomic_write(&path, content.as_bytes())
    }

    /// Optimistic-concurrency update of a versioned document. Reads the
    /// current version, applies `mutate`, bumps the version, re-checks the
    /// on-disk version, and writes — retrying on conflict with exponential
    /// backoff up to five attempts. An absent file starts at version 0.
    pub fn mutate_json<T>(&self, name: &str, mutate: impl Fn(&mut T)) -> Result<T>
    where
        T: Versioned + Serialize + DeserializeOwned + Default + Clone,
    {
        for attempt in 0..MUTATE_MAX_ATTEMPTS {
            let mut doc: T = self.read_json(name)?.unwrap_or_default();
            let seen_version = doc.version();

            mutate(&mut doc);
            doc.set_version(seen_version + 1);

            let current_version = self
                .read_json::<VersionProbe>(name)?
                .map(|p| p.version)
                .unwrap_or(0);
            if current_version != seen_version {
                debug!(
                    file = name,
                    attempt,
                    seen_version,
                    current_version,
                    "version conflict, retrying"
                );
                std::thread::sleep(MUTATE_BASE_BACKOFF * 2u32.pow(attempt));
                continue;
            }

            self.write_json(name, &doc)?;
            return Ok(doc);
        }
        bail!("Failed to update {name} after {MUTATE_MAX_ATTEMPTS} attempts (version conflict)")
    }

    // ---------------------------------------------------------------
    // Plan and status
    // ---------------------------------------------------------------

    pub fn plan(&self) -> Result<String> {
        self.read_text("plan.md")
    }

    pub fn save_plan(&self, plan: &str) -> Result<()> {
        self.write_text("plan.md", plan)
    }

    pub fn status(&self) -> Result<StatusFile> {
        Ok(self.read_json("status.json")?.unwrap_or_default())
    }

    /// Patch the status singleton, stamping `last_updated`.
    pub fn update_status(&self, patch: impl Fn(&mut StatusFile)) -> Result<StatusFile> {
        self.mutate_json("status.json", |status: &mut StatusFile| {
            patch(status);
            status.last_updated = Some(now_iso());
        })
    }

    pub fn snapshot(&self) -> Result<StateSnapshot> {
        Ok(StateSnapshot {
            plan: self.plan()?,
            tasks: self.tasks_file()?,
            status: self.status()?,
        })
    }

    // ---------------------------------------------------------------
    // Tasks
    // ---------------------------------------------------------------

    pub fn tasks_file(&self) -> Result<TasksFile> {
        Ok(self.read_json("tasks.json")?.unwrap_or_default())
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.state_dir.join("tasks").join(format!("{task_id}.json"))
    }

    /// Add a new task: allocate the id and append the header under
    /// `mutate_json`, then write the full per-task record.
    pub fn add_task(&self, new_task: &NewTask) -> Result<String> {
        let index = self.mutate_json("tasks.json", |index: &mut TasksFile| {
            index.allocate(&new_task.title, new_task.priority);
        })?;
        let entry = index
            .tasks
            .last()
            .context("task index empty after allocation")?;
        let task_id = entry.id.clone();

        let task = Task {
            id: task_id.clone(),
            title: new_task.title.clone(),
            description: new_task.description.clone(),
            priority: new_task.priority,
            status: TaskStatus::Pending,
            created_at: entry.created_at.clone(),
            files: new_task.files.clone(),
            dependencies: new_task.dependencies.clone(),
            estimated_hours: new_task.estimated_hours,
            ..Task::from_index_entry(entry)
        };
        self.save_task_doc(&task_id, &serde_json::to_value(&task)?)?;
        Ok(task_id)
    }

    /// Load a task. The index is consulted first; a missing per-task file
    /// yields the task in its creation-time state from the index header.
    pub fn task(&self, task_id: &str) -> Result<Option<Task>> {
        let index = self.tasks_file()?;
        let Some(entry) = index.entry(task_id) else {
            return Ok(None);
        };
        let path = self.task_path(task_id);
        if !path.exists() {
            return Ok(Some(Task::from_index_entry(entry)));
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match serde_json::from_str::<Task>(&content) {
            Ok(task) => Ok(Some(task)),
            Err(e) => {
                warn!(task_id, error = %e, "unreadable task file, using index entry");
                Ok(Some(Task::from_index_entry(entry)))
            }
        }
    }

    fn load_task_doc(&self, task_id: &str) -> Result<Option<Map<String, Value>>> {
        let path = self.task_path(task_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            _ => Ok(None),
        }
    }

    fn save_task_doc(&self, task_id: &str, doc: &Value) -> Result<()> {
        let content = serde_json::to_string_pretty(doc)?;
        atomic_write(&self.task_path(task_id), content.as_bytes())
    }

    /// Merge a patch into the per-task record. Only the individual task
    /// file is touched — never the index. `updated_at` is stamped iff the
    /// patch changes `status`, and status changes must follow the legal
    /// transition set.
    pub fn update_task(&self, task_id: &str, patch: Map<String, Value>) -> Result<()> {
        let mut doc = match self.load_task_doc(task_id)? {
            Some(doc) => doc,
            None => {
                let index = self.tasks_file()?;
                let entry = index.entry(task_id).ok_or_else(|| {
                    anyhow::Error::new(OrchestratorError::Task {
                        task_id: task_id.to_string(),
                        message: "not found".into(),
                    })
                })?;
                serde_json::to_value(Task::from_index_entry(entry))?
                    .as_object()
                    .cloned()
                    .unwrap_or_default()
            }
        };

        let status_changed = match patch.get("status").and_then(Value::as_str) {
            Some(next_str) => {
                let current = doc
                    .get("status")
                    .and_then(Value::as_str)
                    .map(TaskStatus::from_str_lenient)
                    .unwrap_or_default();
                let next = TaskStatus::from_str_lenient(next_str);
                if next != current && !current.can_transition_to(next) {
                    bail!(OrchestratorError::Task {
                        task_id: task_id.to_string(),
                        message: format!(
                            "illegal status transition {} -> {}",
                            current.as_str(),
                            next.as_str()
                        ),
                    });
                }
                next != current
            }
            None => false,
        };

        for (key, value) in patch {
            doc.insert(key, value);
        }
        if status_changed {
            doc.insert("updated_at".into(), Value::String(now_iso()));
        }
        self.save_task_doc(task_id, &Value::Object(doc))
    }

    pub fn assign_task(&self, task_id: &str, worker: &str) -> Result<()> {
        let mut patch = Map::new();
        patch.insert("status".into(), "in_progress".into());
        patch.insert("assigned_to".into(), worker.into());
        patch.insert("started_at".into(), now_iso().into());
        self.update_task(task_id, patch)
    }

    /// Mark a task completed: write the result report to `results/`, then
    /// patch the per-task record with the outcome.
    pub fn complete_task(&self, task_id: &str, result: &TaskResult) -> Result<()> {
        let result_file = format!("results/{task_id}.md");
        self.write_text(&result_file, &result.report)?;

        let mut patch = Map::new();
        patch.insert("status".into(), "completed".into());
        patch.insert("completed_at".into(), now_iso().into());
        patch.insert("result_file".into(), result_file.into());
        patch.insert("result".into(), serde_json::to_value(result)?);
        self.update_task(task_id, patch)
    }

    pub fn fail_task(&self, task_id: &str, error: &str) -> Result<()> {
        let mut patch = Map::new();
        patch.insert("status".into(), "failed".into());
        patch.insert("failed_at".into(), now_iso().into());
        patch.insert("error".into(), error.into());
        self.update_task(task_id, patch)
    }

    pub fn all_tasks(&self) -> Result<Vec<Task>> {
        let index = self.tasks_file()?;
        let mut tasks = Vec::with_capacity(index.tasks.len());
        for entry in &index.tasks {
            if let Some(task) = self.task(&entry.id)? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    pub fn pending_tasks(&self) -> Result<Vec<Task>> {
        Ok(self
            .all_tasks()?
            .into_iter()
            .filter(Task::is_pending)
            .collect())
    }

    pub fn statistics(&self) -> Result<TaskStatistics> {
        Ok(TaskStatistics::from_tasks(&self.all_tasks()?))
    }

    /// Reset tasks stranded `in_progress` by a crash back to `pending`.
    /// Called once at driver startup; returns the recovered ids.
    pub fn recover_in_progress_tasks(&self) -> Result<Vec<String>> {
        let mut recovered = Vec::new();
        for task in self.all_tasks()? {
            if task.is_in_progress() {
                let mut patch = Map::new();
                patch.insert("status".into(), "pending".into());
                patch.insert("recovered_at".into(), now_iso().into());
                patch.insert(
                    "recovery_reason".into(),
                    "System restart - task was in_progress".into(),
                );
                self.update_task(&task.id, patch)?;
                recovered.push(task.id);
            }
        }
        Ok(recovered)
    }
}

/// Probe type for the version re-check in `mutate_json`.
#[derive(serde::Deserialize)]
struct VersionProbe {
    #[serde(default)]
    version: u64,
}

/// Write-temp-then-rename in the target's own directory so the rename
/// never crosses a filesystem boundary.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        use std::io::Write;
        file.write_all(bytes)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (StateStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state"), dir.path().join("state/backups"))
            .unwrap();
        (store, dir)
    }

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.into(),
            description: format!("work on {title}"),
            ..NewTask::default()
        }
    }

    #[test]
    fn add_task_assigns_monotonic_ids() {
        let (store, _dir) = store();
        let a = store.add_task(&new_task("one")).unwrap();
        let b = store.add_task(&new_task("two")).unwrap();
        let c = store.add_task(&new_task("three")).unwrap();
        assert_eq!(a, "task_001");
        assert_eq!(b, "task_002");
        assert_eq!(c, "task_003");

        let index = store.tasks_file().unwrap();
        assert_eq!(index.next_task_id, 4);
        assert_eq!(index.tasks.len(), 3);
        assert!(store.task("task_002").unwrap().is_some());
    }

    #[test]
    fn index_version_increments_per_add() {
        let (store, _dir) = store();
        store.add_task(&new_task("one")).unwrap();
        let v1 = store.tasks_file().unwrap().version;
        store.add_task(&new_task("two")).unwrap();
        let v2 = store.tasks_file().unwrap().version;
        assert!(v2 > v1);
    }

    #[test]
    fn missing_task_file_falls_back_to_index_entry() {
        let (store, _dir) = store();
        let id = store.add_task(&new_task("ghost")).unwrap();
        fs::remove_file(store.task_path(&id)).unwrap();

        let task = store.task(&id).unwrap().unwrap();
        assert_eq!(task.title, "ghost");
        assert!(task.is_pending());
        assert!(task.description.is_empty());
    }

    #[test]
    fn unknown_task_is_none() {
        let (store, _dir) = store();
        assert!(store.task("task_404").unwrap().is_none());
    }

    #[test]
    fn lifecycle_happy_path() {
        let (store, _dir) = store();
        let id = store.add_task(&new_task("build")).unwrap();

        store.assign_task(&id, "worker_1").unwrap();
        let task = store.task(&id).unwrap().unwrap();
        assert!(task.is_in_progress());
        assert_eq!(task.assigned_to.as_deref(), Some("worker_1"));
        assert!(task.started_at.is_some());
        assert!(task.updated_at.is_some());

        store
            .complete_task(&id, &TaskResult::new("# report\nall good"))
            .unwrap();
        let task = store.task(&id).unwrap().unwrap();
        assert!(task.is_completed());
        assert!(task.completed_at.is_some());
        let result_file = task.result_file.clone().unwrap();
        assert_eq!(
            store.read_text(&result_file).unwrap(),
            task.result.unwrap().report
        );
    }

    #[test]
    fn failure_records_error() {
        let (store, _dir) = store();
        let id = store.add_task(&new_task("doomed")).unwrap();
        store.assign_task(&id, "worker_1").unwrap();
        store.fail_task(&id, "LLM error: exit 1").unwrap();

        let task = store.task(&id).unwrap().unwrap();
        assert!(task.is_failed());
        assert!(task.failed_at.is_some());
        assert_eq!(task.error.as_deref(), Some("LLM error: exit 1"));
    }

    #[test]
    fn terminal_states_never_regress() {
        let (store, _dir) = store();
        let id = store.add_task(&new_task("done")).unwrap();
        store.assign_task(&id, "w").unwrap();
        store.complete_task(&id, &TaskResult::new("ok")).unwrap();

        let mut patch = Map::new();
        patch.insert("status".into(), "pending".into());
        assert!(store.update_task(&id, patch).is_err());

        let mut patch = Map::new();
        patch.insert("status".into(), "failed".into());
        assert!(store.update_task(&id, patch).is_err());
    }

    #[test]
    fn pending_cannot_jump_to_completed() {
        let (store, _dir) = store();
        let id = store.add_task(&new_task("eager")).unwrap();
        let mut patch = Map::new();
        patch.insert("status".into(), "completed".into());
        assert!(store.update_task(&id, patch).is_err());
    }

    #[test]
    fn non_status_patch_does_not_stamp_updated_at() {
        let (store, _dir) = store();
        let id = store.add_task(&new_task("quiet")).unwrap();
        let mut patch = Map::new();
        patch.insert("description".into(), "refined".into());
        store.update_task(&id, patch).unwrap();

        let task = store.task(&id).unwrap().unwrap();
        assert_eq!(task.description, "refined");
        assert!(task.updated_at.is_none());
    }

    #[test]
    fn recover_resets_in_progress_only() {
        let (store, _dir) = store();
        let a = store.add_task(&new_task("stuck")).unwrap();
        let b = store.add_task(&new_task("fine")).unwrap();
        let c = store.add_task(&new_task("finished")).unwrap();
        store.assign_task(&a, "w").unwrap();
        store.assign_task(&c, "w").unwrap();
        store.complete_task(&c, &TaskResult::new("ok")).unwrap();

        let recovered = store.recover_in_progress_tasks().unwrap();
        assert_eq!(recovered, vec![a.clone()]);

        let task = store.task(&a).unwrap().unwrap();
        assert!(task.is_pending());
        assert!(task.recovered_at.is_some());
        assert_eq!(
            task.recovery_reason.as_deref(),
            Some("System restart - task was in_progress")
        );
        assert!(store.task(&b).unwrap().unwrap().is_pending());
        assert!(store.task(&c).unwrap().unwrap().is_completed());
        assert!(store.all_tasks().unwrap().iter().all(|t| !t.is_in_progress()));
    }

    #[test]
    fn statistics_count_by_status() {
        let (store, _dir) = store();
        let a = store.add_task(&new_task("a")).unwrap();
        store.add_task(&new_task("b")).unwrap();
        store.assign_task(&a, "w").unwrap();
        store.complete_task(&a, &TaskResult::new("r")).unwrap();

        let stats = store.statistics().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
    }

    #[test]
    fn mutate_json_detects_conflicts() {
        let (store, _dir) = store();
        store
            .mutate_json("status.json", |status: &mut StatusFile| {
                status.current_iteration = Some(1);
            })
            .unwrap();
        let status = store.status().unwrap();
        assert_eq!(status.version, 1);
        assert_eq!(status.current_iteration, Some(1));

        store
            .mutate_json("status.json", |status: &mut StatusFile| {
                status.current_iteration = Some(2);
            })
            .unwrap();
        assert_eq!(store.status().unwrap().version, 2);
    }

    #[test]
    fn corrupt_json_is_a_corruption_error() {
        let (store, _dir) = store();
        fs::write(store.state_dir().join("tasks.json"), "{not json").unwrap();
        let err = store.read_json::<TasksFile>("tasks.json").unwrap_err();
        let orchestrator = err.downcast_ref::<OrchestratorError>().unwrap();
        assert!(matches!(
            orchestrator,
            OrchestratorError::StateCorruption { .. }
        ));
    }

    #[test]
    fn update_status_stamps_last_updated() {
        let (store, _dir) = store();
        let status = store
            .update_status(|s| s.should_continue = Some(false))
            .unwrap();
        assert!(status.last_updated.is_some());
        assert!(!store.status().unwrap().should_continue());
    }

    #[test]
    fn plan_round_trips() {
        let (store, _dir) = store();
        assert_eq!(store.plan().unwrap(), "");
        store.save_plan("# Plan\n1. do the thing\n").unwrap();
        assert_eq!(store.plan().unwrap(), "# Plan\n1. do the thing\n");
    }
}
