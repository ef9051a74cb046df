//! The iteration driver: the top-level Planner → Workers → Judge loop,
//! with startup recovery, per-iteration checkpoints, and clean shutdown
//! on interrupt.

use crate::config::Config;
use crate::errors::OrchestratorError;
use crate::gitinfo::CommitLookup;
use crate::intent::{IntentHeadings, IntentParser, IntentTracker};
use crate::llm::LlmClient;
use crate::locks::LockManager;
use crate::logging::RunLogger;
use crate::models::{ModelSelector, Task};
use crate::prompts::{PromptLibrary, PromptTemplate};
use crate::roles::{Judge, PlanJudge, Planner, Role, RoleRunner, Worker};
use crate::scheduler::TaskScheduler;
use crate::state::StateStore;
use crate::ui;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Per-file lock acquisition timeout for workers.
const WORKER_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
/// Stale-lock sweep threshold, applied once per iteration.
const LOCK_SWEEP_THRESHOLD: Duration = Duration::from_secs(300);
/// A backup is taken every this many iterations.
const BACKUP_EVERY: u32 = 5;

/// How a planning phase ended.
#[derive(Debug, PartialEq, Eq)]
enum PlanningOutcome {
    Accepted,
    NonConvergent,
}

/// Everything a spawned worker task needs, shared by `Arc`.
struct WorkerContext {
    store: Arc<StateStore>,
    locks: Arc<LockManager>,
    runner: Arc<RoleRunner>,
    logger: Arc<RunLogger>,
    intents: Arc<IntentTracker>,
    commits: Arc<CommitLookup>,
    working_dir: std::path::PathBuf,
    worker_template: PromptTemplate,
    selector: ModelSelector,
}

pub struct IterationDriver {
    config: Config,
    store: Arc<StateStore>,
    locks: Arc<LockManager>,
    scheduler: TaskScheduler,
    runner: Arc<RoleRunner>,
    logger: Arc<RunLogger>,
    prompts: PromptLibrary,
    worker_context: Arc<WorkerContext>,
}

impl IterationDriver {
    pub fn new(config: Config, client: Arc<dyn LlmClient>) -> Result<Self> {
        let store = Arc::new(StateStore::new(
            config.state_dir.clone(),
            config.backup_dir(),
        )?);
        let locks = Arc::new(LockManager::new(config.state_dir.join("locks"))?);
        let logger = Arc::new(RunLogger::new(config.log_dir.clone())?);
        let runner = Arc::new(RoleRunner::new(
            client,
            store.clone(),
            logger.clone(),
            config.max_retries,
        ));
        let scheduler = TaskScheduler::new(store.clone(), locks.clone());
        let prompts = PromptLibrary::new(Some(config.project_root.join("prompts")));
        let intents = Arc::new(IntentTracker::new(config.state_dir.clone())?);
        let commits = Arc::new(CommitLookup::open(&config.working_dir));

        let worker_context = Arc::new(WorkerContext {
            store: store.clone(),
            locks: locks.clone(),
            runner: runner.clone(),
            logger: logger.clone(),
            intents,
            commits,
            working_dir: config.working_dir.clone(),
            worker_template: prompts.get("worker"),
            selector: ModelSelector::new(
                config.model_selection.clone(),
                config.role_model("worker"),
            ),
        });

        Ok(Self {
            config,
            store,
            locks,
            scheduler,
            runner,
            logger,
            prompts,
            worker_context,
        })
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Run the loop to completion, handling interrupt and fatal errors
    /// with a named checkpoint and lock release either way.
    pub async fn run(&self) -> Result<()> {
        self.startup()?;

        tokio::select! {
            result = self.run_loop() => match result {
                Ok(()) => {
                    self.locks.release_all();
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "fatal driver error");
                    self.locks.release_all();
                    if let Err(cp) = self.store.create_checkpoint(Some("error")) {
                        warn!(error = %cp, "failed to write error checkpoint");
                    }
                    Err(e)
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                self.locks.release_all();
                self.store.create_checkpoint(Some("interrupted"))?;
                Ok(())
            }
        }
    }

    /// Validate state (recovering from corruption when needed), reset
    /// stranded tasks, and take the initial checkpoint.
    pub fn startup(&self) -> Result<()> {
        let report = self.store.validate();
        for warning in &report.warnings {
            info!(warning, "state validation");
        }
        if !report.is_valid() {
            warn!(errors = ?report.errors, "state invalid, attempting recovery");
            if self.store.recover_from_corruption() {
                info!("state recovered from snapshot");
            } else {
                warn!("no usable snapshot, continuing with current state");
            }
        }

        let recovered = self
            .store
            .recover_in_progress_tasks()
            .context("task recovery failed")?;
        if !recovered.is_empty() {
            info!(tasks = ?recovered, "reset in_progress tasks to pending");
        }

        self.store.create_checkpoint(Some("initial"))?;
        Ok(())
    }

    async fn run_loop(&self) -> Result<()> {
        for iteration in 1..=self.config.max_iterations {
            ui::iteration_header(iteration, self.config.max_iterations);
            self.store
                .update_status(|status| status.current_iteration = Some(iteration))?;

            match self.planning_phase(iteration).await {
                Ok(PlanningOutcome::Accepted) => {}
                Ok(PlanningOutcome::NonConvergent) => {
                    // Fatal for this iteration: no workers, no judge.
                    let err = OrchestratorError::Agent {
                        agent: "planner".into(),
                        message: format!(
                            "plan not accepted after {} revisions",
                            self.config.max_plan_revisions
                        ),
                        source: None,
                    };
                    self.logger
                        .log_error("planner", &err, serde_json::json!({"iteration": iteration}));
                    error!(iteration, "planning did not converge, skipping iteration");
                    self.finish_iteration(iteration).await?;
                    continue;
                }
                Err(e) => {
                    // A bad planner response must not take the loop down.
                    ui::role_error("planner", &e.to_string());
                    warn!(error = %e, "planning phase failed, continuing");
                }
            }

            tokio::time::sleep(self.config.wait_time).await;

            self.worker_phase(iteration).await;
            let swept = self.locks.cleanup_stale(LOCK_SWEEP_THRESHOLD);
            if swept > 0 {
                info!(count = swept, "stale locks removed");
            }

            tokio::time::sleep(self.config.wait_time).await;

            let judge = self.make_judge();
            if let Err(e) = self.runner.run(&judge, iteration).await {
                ui::role_error("judge", &e.to_string());
                warn!(error = %e, "judge failed, continuing");
            }

            let stats = self.store.statistics()?;
            self.logger.log_progress(iteration, &stats);
            ui::progress_line(&stats);

            let status = self.store.status()?;
            if !status.should_continue() {
                ui::stop_line(status.reason.as_deref().unwrap_or("judge requested stop"));
                info!(
                    reason = status.reason.as_deref().unwrap_or(""),
                    "judge stopped the loop"
                );
                return Ok(());
            }

            self.finish_iteration(iteration).await?;
        }

        info!(
            max_iterations = self.config.max_iterations,
            "iteration limit reached"
        );
        Ok(())
    }

    /// Checkpoint (plus periodic backup) and the inter-iteration wait.
    async fn finish_iteration(&self, iteration: u32) -> Result<()> {
        self.store.create_checkpoint(None)?;
        if iteration % BACKUP_EVERY == 0 {
            self.store.create_backup(None)?;
        }
        tokio::time::sleep(self.config.wait_time).await;
        Ok(())
    }

    /// Planner then Plan-Judge, revising up to `max_plan_revisions` times
    /// before declaring non-convergence.
    async fn planning_phase(&self, iteration: u32) -> Result<PlanningOutcome, OrchestratorError> {
        let planner = self.make_planner();
        let plan_judge = self.make_plan_judge();

        for revision in 0..self.config.max_plan_revisions.max(1) {
            self.runner.run(&planner, iteration).await?;
            let review = self.runner.run(&plan_judge, iteration).await?;
            if review.is_accept() {
                return Ok(PlanningOutcome::Accepted);
            }
            info!(
                revision = revision + 1,
                issues = review.issues.len(),
                "plan sent back for revision"
            );
        }
        Ok(PlanningOutcome::NonConvergent)
    }

    /// Run the worker batch. Role and lock failures are contained per
    /// task; this phase never propagates an error into the loop.
    async fn worker_phase(&self, iteration: u32) {
        if self.config.enable_parallel_execution {
            let batch = match self
                .scheduler
                .parallelizable_tasks(self.config.max_parallel_workers)
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "scheduler failed");
                    return;
                }
            };
            if batch.is_empty() {
                info!("no runnable tasks this iteration");
                return;
            }
            info!(count = batch.len(), "dispatching worker batch");

            let mut join_set = JoinSet::new();
            for task in batch {
                let context = self.worker_context.clone();
                join_set.spawn(async move {
                    execute_task(context, task, iteration).await;
                });
            }
            while let Some(joined) = join_set.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "worker task panicked");
                }
            }
        } else {
            let first_pending = match self.store.pending_tasks() {
                Ok(mut pending) if !pending.is_empty() => pending.remove(0),
                Ok(_) => {
                    info!("no pending tasks");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "could not load pending tasks");
                    return;
                }
            };
            execute_task(self.worker_context.clone(), first_pending, iteration).await;
        }
    }

    fn make_planner(&self) -> Planner {
        Planner::new(
            self.config.project_goal.clone(),
            self.config.working_dir.clone(),
            self.prompts.get("planner"),
            self.config.role_model("planner"),
        )
    }

    fn make_plan_judge(&self) -> PlanJudge {
        PlanJudge::new(
            self.config.project_goal.clone(),
            self.config.working_dir.clone(),
            self.prompts.get("plan_judge"),
            self.config.role_model("plan_judge"),
        )
    }

    fn make_judge(&self) -> Judge {
        Judge::new(
            self.config.project_goal.clone(),
            self.prompts.get("judge"),
            self.config.role_model("judge"),
        )
    }
}

/// One worker execution: take the file locks, assign, run the role, and
/// release. A lock timeout abandons the task for this iteration; an LLM
/// or state failure marks only this task failed.
async fn execute_task(context: Arc<WorkerContext>, task: Task, iteration: u32) {
    let files = TaskScheduler::task_files(&task);
    let mut acquired: Vec<String> = Vec::new();
    for file in &files {
        if context
            .locks
            .acquire(file, &task.id, WORKER_LOCK_TIMEOUT)
            .await
        {
            acquired.push(file.clone());
        } else {
            info!(task_id = %task.id, file, "lock unavailable, abandoning task this iteration");
            for held in &acquired {
                context.locks.release(held);
            }
            return;
        }
    }

    if let Err(e) = context.store.assign_task(&task.id, "worker") {
        warn!(task_id = %task.id, error = %e, "could not assign task");
        for held in &acquired {
            context.locks.release(held);
        }
        return;
    }

    let worker = Worker::new(
        task.clone(),
        context.working_dir.clone(),
        context.worker_template.clone(),
        context.selector.clone(),
        IntentParser::new(&IntentHeadings::default()),
        context.intents.clone(),
        context.commits.clone(),
    );

    if let Err(e) = context.runner.run(&worker, iteration).await {
        context.logger.log_error(
            worker.name(),
            &e,
            serde_json::json!({"iteration": iteration, "task_id": task.id}),
        );
        if let Err(fail_err) = context.store.fail_task(&task.id, &e.to_string()) {
            error!(task_id = %task.id, error = %fail_err, "could not mark task failed");
        }
    }

    for held in &acquired {
        context.locks.release(held);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;
    use crate::roles::testing::ScriptedClient;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let pairs: HashMap<String, String> = [
            ("PROJECT_ROOT", dir.path().to_str().unwrap()),
            ("STATE_DIR", dir.path().join("state").to_str().unwrap()),
            ("LOG_DIR", dir.path().join("logs").to_str().unwrap()),
            ("WAIT_TIME_SECONDS", "0"),
            ("MAX_ITERATIONS", "1"),
            ("MAX_RETRIES", "1"),
            ("PROJECT_GOAL", "add README"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Config::from_lookup(|key| pairs.get(key).cloned()).unwrap()
    }

    const PLANNER_RESPONSE: &str = r##"```json
{
  "plan_update": "# Plan\n1. add a README",
  "new_tasks": [
    {"title": "add README", "description": "create README.md", "priority": "high",
     "files": ["README.md"]}
  ],
  "reasoning": "single obvious step"
}
```"##;

    const ACCEPT_RESPONSE: &str = r#"```json
{"decision": "accept", "score": 0.9, "issues": [], "suggested_changes": ""}
```"#;

    const REJECT_RESPONSE: &str = r#"```json
{"decision": "revise", "score": 0.2, "issues": ["too vague"], "suggested_changes": "split"}
```"#;

    const WORKER_RESPONSE: &str = r#"# タスク完了レポート

## 実装内容
Created README.md with usage instructions.

コミットハッシュ: abcd123
コミットメッセージ: add readme
"#;

    const JUDGE_CONTINUE: &str = r#"```json
{"should_continue": true, "reason": "more to do", "progress_score": 0.5,
 "drift_detected": false, "recommendations": [], "next_iteration_focus": "tests"}
```"#;

    #[tokio::test]
    async fn single_task_happy_path() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(
            ScriptedClient::new()
                .push_ok(PLANNER_RESPONSE)
                .push_ok(ACCEPT_RESPONSE)
                .push_ok(WORKER_RESPONSE)
                .push_ok(JUDGE_CONTINUE),
        );
        let driver = IterationDriver::new(test_config(&dir), client).unwrap();

        driver.startup().unwrap();
        driver.run_loop().await.unwrap();

        let store = driver.store();
        let index = store.tasks_file().unwrap();
        assert_eq!(index.tasks.len(), 1);
        assert_eq!(index.tasks[0].id, "task_001");

        let task = store.task("task_001").unwrap().unwrap();
        assert!(task.is_completed());
        let report = store.read_text("results/task_001.md").unwrap();
        assert!(!report.is_empty());

        let status = store.status().unwrap();
        assert!(status.should_continue());
        assert_eq!(status.current_iteration, Some(1));
        assert!(status.last_planner_run.is_some());
        assert!(status.last_worker_run.is_some());
        assert!(status.last_judge_run.is_some());

        // initial + per-iteration checkpoint.
        assert!(store.list_checkpoints().unwrap().len() >= 2);
        // No lock files left behind.
        assert!(driver.locks.locked_files().is_empty());
    }

    #[tokio::test]
    async fn judge_stop_ends_the_loop() {
        let dir = TempDir::new().unwrap();
        let stop = r#"{"should_continue": false, "reason": "goal reached", "progress_score": 1.0}"#;
        let client = Arc::new(
            ScriptedClient::new()
                .push_ok(PLANNER_RESPONSE)
                .push_ok(ACCEPT_RESPONSE)
                .push_ok(WORKER_RESPONSE)
                .push_ok(stop),
        );
        let mut config = test_config(&dir);
        config.max_iterations = 10;
        let driver = IterationDriver::new(config, client).unwrap();

        driver.startup().unwrap();
        driver.run_loop().await.unwrap();

        let status = driver.store().status().unwrap();
        assert!(!status.should_continue());
        assert_eq!(status.current_iteration, Some(1));
    }

    #[tokio::test]
    async fn startup_recovers_stranded_tasks() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let store = StateStore::new(config.state_dir.clone(), config.backup_dir()).unwrap();
        let id = store
            .add_task(&NewTask {
                title: "stranded".into(),
                ..NewTask::default()
            })
            .unwrap();
        store.assign_task(&id, "w").unwrap();
        drop(store);

        let driver =
            IterationDriver::new(config, Arc::new(ScriptedClient::new())).unwrap();
        driver.startup().unwrap();

        let task = driver.store().task(&id).unwrap().unwrap();
        assert!(task.is_pending());
        assert!(task.recovered_at.is_some());
        assert_eq!(
            task.recovery_reason.as_deref(),
            Some("System restart - task was in_progress")
        );
        assert!(
            driver
                .store()
                .list_checkpoints()
                .unwrap()
                .iter()
                .any(|c| c.checkpoint_name == "initial")
        );
    }

    #[tokio::test]
    async fn planner_failure_does_not_stop_the_iteration() {
        let dir = TempDir::new().unwrap();
        // Planner exhausts its single attempt; judge still runs and stops
        // the loop cleanly.
        let stop = r#"{"should_continue": false, "reason": "nothing to do", "progress_score": 0.0}"#;
        let client = Arc::new(
            ScriptedClient::new()
                .push_err(|| OrchestratorError::RateLimit {
                    message: "429".into(),
                })
                .push_ok(stop),
        );
        let driver = IterationDriver::new(test_config(&dir), client).unwrap();

        driver.startup().unwrap();
        driver.run_loop().await.unwrap();

        let status = driver.store().status().unwrap();
        assert!(status.last_judge_run.is_some());
        assert!(!status.should_continue());
    }

    #[tokio::test]
    async fn planning_non_convergence_skips_workers_and_judge() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.max_plan_revisions = 2;
        // Two full planner/plan-judge rounds, both rejected.
        let client = Arc::new(
            ScriptedClient::new()
                .push_ok(PLANNER_RESPONSE)
                .push_ok(REJECT_RESPONSE)
                .push_ok(PLANNER_RESPONSE)
                .push_ok(REJECT_RESPONSE),
        );
        let driver = IterationDriver::new(config, client).unwrap();

        driver.startup().unwrap();
        driver.run_loop().await.unwrap();

        let status = driver.store().status().unwrap();
        // The judge never ran: the iteration was abandoned after planning.
        assert!(status.last_judge_run.is_none());
        assert_eq!(status.last_plan_judge_decision.as_deref(), Some("revise"));
        // The planner's task exists but nothing picked it up.
        let task = driver.store().task("task_001").unwrap().unwrap();
        assert!(task.is_pending());
    }

    #[tokio::test]
    async fn worker_llm_failure_marks_only_that_task_failed() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let store = StateStore::new(config.state_dir.clone(), config.backup_dir()).unwrap();
        let doomed = store
            .add_task(&NewTask {
                title: "doomed".into(),
                files: vec!["src/a.rs".into()],
                ..NewTask::default()
            })
            .unwrap();
        let safe = store
            .add_task(&NewTask {
                title: "safe".into(),
                files: vec!["src/b.rs".into()],
                ..NewTask::default()
            })
            .unwrap();
        drop(store);

        // Two worker batches of one: the first worker errors fatally, the
        // second completes.
        let client = Arc::new(
            ScriptedClient::new()
                .push_err(|| OrchestratorError::Config {
                    message: "bad working dir".into(),
                    source: None,
                })
                .push_ok(WORKER_RESPONSE),
        );
        let mut config = test_config(&dir);
        config.max_parallel_workers = 1;
        let driver = IterationDriver::new(config, client).unwrap();

        driver.startup().unwrap();
        driver.worker_phase(1).await;
        driver.worker_phase(2).await;

        let store = driver.store();
        let first = store.task(&doomed).unwrap().unwrap();
        let second = store.task(&safe).unwrap().unwrap();
        assert!(first.is_failed());
        assert!(first.error.is_some());
        assert!(second.is_completed());
        assert!(driver.locks.locked_files().is_empty());
    }
}
