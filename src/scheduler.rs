//! Selects batches of pending tasks that can run concurrently: all
//! dependencies completed, highest priority first, and no two tasks in a
//! batch touching the same file.

use crate::locks::LockManager;
use crate::models::Task;
use crate::state::StateStore;
use anyhow::Result;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::debug;

const FILE_EXTENSIONS: &str = "py|rs|ts|js|md|json|yml|yaml|toml|txt|html|css";

static EXPLICIT_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)file:\s*([^\s\n]+\.(?:{FILE_EXTENSIONS}))")).unwrap()
});
static QUOTED_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"(?i)["'`]([^"'`]+\.(?:{FILE_EXTENSIONS}))["'`]"#
    ))
    .unwrap()
});
static BARE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"([\w\-_/]+\.(?:{FILE_EXTENSIONS}))")).unwrap()
});

/// File paths a piece of prose refers to: explicit `file:` mentions,
/// quoted or backticked names, then bare file-like tokens, deduplicated
/// in that order.
pub fn extract_file_refs(text: &str) -> Vec<String> {
    let mut files = Vec::new();
    let mut seen = HashSet::new();
    for pattern in [&*EXPLICIT_FILE, &*QUOTED_FILE, &*BARE_FILE] {
        for capture in pattern.captures_iter(text) {
            if let Some(m) = capture.get(1) {
                let cleaned = m.as_str().trim().trim_matches(['"', '\'', '`']).to_string();
                if !cleaned.is_empty() && seen.insert(cleaned.clone()) {
                    files.push(cleaned);
                }
            }
        }
    }
    files
}

pub struct TaskScheduler {
    store: Arc<StateStore>,
    locks: Arc<LockManager>,
}

impl TaskScheduler {
    pub fn new(store: Arc<StateStore>, locks: Arc<LockManager>) -> Self {
        Self { store, locks }
    }

    /// All files a task intends to touch: its `files` field plus paths
    /// extracted from the description.
    pub fn task_files(task: &Task) -> Vec<String> {
        let mut files = Vec::new();
        let mut seen = HashSet::new();
        for file in &task.files {
            let cleaned = file.trim().to_string();
            if !cleaned.is_empty() && seen.insert(cleaned.clone()) {
                files.push(cleaned);
            }
        }
        for file in extract_file_refs(&task.description) {
            if seen.insert(file.clone()) {
                files.push(file);
            }
        }
        files
    }

    /// Up to `max_workers` pending tasks that can safely run together:
    /// dependencies completed, sorted by priority (creation order breaks
    /// ties), skipping any candidate whose files are already locked or
    /// reserved by an earlier pick.
    pub fn parallelizable_tasks(&self, max_workers: usize) -> Result<Vec<Task>> {
        let pending = self.store.pending_tasks()?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut ready = self.ready_tasks(pending)?;
        // Stable sort: creation order survives within a priority band.
        ready.sort_by_key(|t| std::cmp::Reverse(t.priority.score()));

        let mut selected: Vec<Task> = Vec::new();
        let mut reserved: HashSet<String> = HashSet::new();

        for task in ready {
            let files = Self::task_files(&task);
            let conflict = files
                .iter()
                .any(|f| reserved.contains(f) || self.locks.is_locked(f));
            if conflict {
                debug!(task_id = %task.id, "skipped: file conflict in batch");
                continue;
            }
            reserved.extend(files);
            selected.push(task);
            if selected.len() >= max_workers {
                break;
            }
        }
        Ok(selected)
    }

    /// Tasks whose dependencies are all completed.
    fn ready_tasks(&self, tasks: Vec<Task>) -> Result<Vec<Task>> {
        let mut ready = Vec::new();
        for task in tasks {
            let mut satisfied = true;
            for dep_id in &task.dependencies {
                let dep = self.store.task(dep_id)?;
                if !dep.is_some_and(|d| d.is_completed()) {
                    satisfied = false;
                    break;
                }
            }
            if satisfied {
                ready.push(task);
            } else {
                debug!(task_id = %task.id, "skipped: unsatisfied dependency");
            }
        }
        Ok(ready)
    }

    /// Two tasks are parallel-safe iff their file sets are disjoint and
    /// neither depends on the other.
    pub fn parallel_safe(a: &Task, b: &Task) -> bool {
        let files_a: HashSet<String> = Self::task_files(a).into_iter().collect();
        let files_b: HashSet<String> = Self::task_files(b).into_iter().collect();
        if !files_a.is_disjoint(&files_b) {
            return false;
        }
        !a.dependencies.contains(&b.id) && !b.dependencies.contains(&a.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, TaskPriority, TaskResult};
    use tempfile::TempDir;

    fn fixture() -> (TaskScheduler, Arc<StateStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            StateStore::new(dir.path().join("state"), dir.path().join("state/backups")).unwrap(),
        );
        let locks = Arc::new(LockManager::new(dir.path().join("state/locks")).unwrap());
        (TaskScheduler::new(store.clone(), locks), store, dir)
    }

    fn add(
        store: &StateStore,
        title: &str,
        files: &[&str],
        priority: TaskPriority,
        deps: &[&str],
    ) -> String {
        store
            .add_task(&NewTask {
                title: title.into(),
                description: format!("do {title}"),
                priority,
                files: files.iter().map(|s| s.to_string()).collect(),
                dependencies: deps.iter().map(|s| s.to_string()).collect(),
                estimated_hours: 0.0,
            })
            .unwrap()
    }

    #[test]
    fn extracts_files_from_prose() {
        let text = r#"Update file: src/main.py and the loader in "config/settings.yaml".
Also touch `docs/readme.md` and utils/helper.py along the way."#;
        let files = extract_file_refs(text);
        assert!(files.contains(&"src/main.py".to_string()));
        assert!(files.contains(&"config/settings.yaml".to_string()));
        assert!(files.contains(&"docs/readme.md".to_string()));
        assert!(files.contains(&"utils/helper.py".to_string()));
        // Deduplicated.
        let unique: HashSet<_> = files.iter().collect();
        assert_eq!(unique.len(), files.len());
    }

    #[test]
    fn extraction_ignores_non_files() {
        assert!(extract_file_refs("no files mentioned here").is_empty());
        assert!(extract_file_refs("binary blob.exe and image.png").is_empty());
    }

    #[test]
    fn batch_respects_priority_and_file_conflicts() {
        let (scheduler, store, _dir) = fixture();
        let a = add(&store, "A", &["src/a.py"], TaskPriority::High, &[]);
        let _b = add(&store, "B", &["src/a.py"], TaskPriority::Medium, &[]);
        let c = add(&store, "C", &["src/b.py"], TaskPriority::High, &[]);

        let batch = scheduler.parallelizable_tasks(2).unwrap();
        let ids: Vec<&str> = batch.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![a.as_str(), c.as_str()]);
    }

    #[test]
    fn dependency_gating() {
        let (scheduler, store, _dir) = fixture();
        let first = add(&store, "first", &["src/x.py"], TaskPriority::Medium, &[]);
        let second = add(&store, "second", &["src/y.py"], TaskPriority::High, &[&first]);

        // Only the dependency-free task is eligible, despite lower priority.
        let batch = scheduler.parallelizable_tasks(3).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, first);

        store.assign_task(&first, "w").unwrap();
        store.complete_task(&first, &TaskResult::new("done")).unwrap();

        let batch = scheduler.parallelizable_tasks(3).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, second);
    }

    #[test]
    fn missing_dependency_blocks() {
        let (scheduler, store, _dir) = fixture();
        add(&store, "orphan", &[], TaskPriority::High, &["task_999"]);
        assert!(scheduler.parallelizable_tasks(3).unwrap().is_empty());
    }

    #[tokio::test]
    async fn externally_locked_files_exclude_candidates() {
        let (scheduler, store, dir) = fixture();
        let locks = LockManager::new(dir.path().join("state/locks")).unwrap();
        add(&store, "locked-out", &["src/busy.py"], TaskPriority::High, &[]);
        let free = add(&store, "free", &["src/idle.py"], TaskPriority::Low, &[]);

        assert!(
            locks
                .acquire("src/busy.py", "task_zz", std::time::Duration::from_secs(1))
                .await
        );
        let batch = scheduler.parallelizable_tasks(3).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, free);
    }

    #[test]
    fn batch_size_is_capped() {
        let (scheduler, store, _dir) = fixture();
        for i in 0..5 {
            add(
                &store,
                &format!("t{i}"),
                &[&format!("src/f{i}.py")],
                TaskPriority::Medium,
                &[],
            );
        }
        assert_eq!(scheduler.parallelizable_tasks(3).unwrap().len(), 3);
    }

    #[test]
    fn files_come_from_description_too() {
        let (scheduler, store, _dir) = fixture();
        store
            .add_task(&NewTask {
                title: "implicit".into(),
                description: "refactor src/shared.py carefully".into(),
                ..NewTask::default()
            })
            .unwrap();
        store
            .add_task(&NewTask {
                title: "explicit".into(),
                description: "unrelated".into(),
                files: vec!["src/shared.py".into()],
                ..NewTask::default()
            })
            .unwrap();

        // Both touch src/shared.py, so only one may run.
        let batch = scheduler.parallelizable_tasks(3).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn parallel_safe_checks_files_and_dependencies() {
        let (_scheduler, store, _dir) = fixture();
        let a = add(&store, "a", &["src/a.py"], TaskPriority::Medium, &[]);
        let b = add(&store, "b", &["src/b.py"], TaskPriority::Medium, &[]);
        let c = add(&store, "c", &["src/c.py"], TaskPriority::Medium, &[&a]);

        let task_a = store.task(&a).unwrap().unwrap();
        let task_b = store.task(&b).unwrap().unwrap();
        let task_c = store.task(&c).unwrap().unwrap();

        assert!(TaskScheduler::parallel_safe(&task_a, &task_b));
        assert!(!TaskScheduler::parallel_safe(&task_a, &task_c));

        let mut shadow = task_b.clone();
        shadow.files = vec!["src/a.py".into()];
        assert!(!TaskScheduler::parallel_safe(&task_a, &shadow));
    }
}
