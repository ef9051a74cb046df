//! Runtime configuration for maestro.
//!
//! All knobs are environment-driven (with `.env` support via dotenvy,
//! loaded in `main`). The struct is built once at startup and threaded
//! explicitly — no module globals.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Process-wide configuration, constructed once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of this orchestrator checkout.
    pub project_root: PathBuf,
    /// The repository the agents modify. Defaults to `project_root`.
    pub working_dir: PathBuf,
    /// Natural-language goal shown to every role.
    pub project_goal: String,

    pub llm_backend: String,
    pub llm_output_format: String,
    /// Backend default model when unset.
    pub llm_model: Option<String>,
    pub planner_model: Option<String>,
    pub worker_model: Option<String>,
    pub judge_model: Option<String>,
    pub model_selection: ModelSelectionConfig,

    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub log_fsync: bool,

    pub wait_time: Duration,
    pub max_iterations: u32,
    pub max_retries: u32,
    pub max_plan_revisions: u32,

    pub enable_parallel_execution: bool,
    pub max_parallel_workers: usize,
}

/// Dynamic worker-model selection knobs.
#[derive(Debug, Clone, Default)]
pub struct ModelSelectionConfig {
    pub enabled: bool,
    pub model_light: Option<String>,
    pub model_standard: Option<String>,
    pub model_powerful: Option<String>,
    pub threshold_light: f64,
    pub threshold_powerful: f64,
}

impl Config {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Extracted so tests can supply
    /// configuration without mutating the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let project_root = PathBuf::from(opt(&lookup, "PROJECT_ROOT").unwrap_or_else(|| ".".into()));
        let working_dir = opt(&lookup, "TARGET_PROJECT")
            .map(PathBuf::from)
            .unwrap_or_else(|| project_root.clone());

        let model_selection = ModelSelectionConfig {
            enabled: flag(&lookup, "MODEL_SELECTION_ENABLED", false)?,
            model_light: opt(&lookup, "WORKER_MODEL_LIGHT"),
            model_standard: opt(&lookup, "WORKER_MODEL_STANDARD"),
            model_powerful: opt(&lookup, "WORKER_MODEL_POWERFUL"),
            threshold_light: number(&lookup, "MODEL_COMPLEXITY_THRESHOLD_LIGHT", 10.0)?,
            threshold_powerful: number(&lookup, "MODEL_COMPLEXITY_THRESHOLD_POWERFUL", 30.0)?,
        };

        Ok(Self {
            project_root,
            working_dir,
            project_goal: opt(&lookup, "PROJECT_GOAL")
                .unwrap_or_else(|| "Set PROJECT_GOAL to describe what to build".into()),
            llm_backend: opt(&lookup, "LLM_BACKEND").unwrap_or_else(|| "cursor_cli".into()),
            llm_output_format: opt(&lookup, "LLM_OUTPUT_FORMAT").unwrap_or_else(|| "text".into()),
            llm_model: opt(&lookup, "LLM_MODEL"),
            planner_model: opt(&lookup, "PLANNER_MODEL"),
            worker_model: opt(&lookup, "WORKER_MODEL"),
            judge_model: opt(&lookup, "JUDGE_MODEL"),
            model_selection,
            state_dir: PathBuf::from(opt(&lookup, "STATE_DIR").unwrap_or_else(|| "state".into())),
            log_dir: PathBuf::from(opt(&lookup, "LOG_DIR").unwrap_or_else(|| "logs".into())),
            log_level: opt(&lookup, "LOG_LEVEL").unwrap_or_else(|| "INFO".into()),
            log_fsync: flag(&lookup, "LOG_FSYNC", false)?,
            wait_time: Duration::from_secs(number(&lookup, "WAIT_TIME_SECONDS", 60.0)? as u64),
            max_iterations: number(&lookup, "MAX_ITERATIONS", 100.0)? as u32,
            max_retries: number(&lookup, "MAX_RETRIES", 3.0)? as u32,
            max_plan_revisions: number(&lookup, "MAX_PLAN_REVISIONS", 3.0)? as u32,
            enable_parallel_execution: flag(&lookup, "ENABLE_PARALLEL_EXECUTION", true)?,
            max_parallel_workers: number(&lookup, "MAX_PARALLEL_WORKERS", 3.0)? as usize,
        })
    }

    /// Model override for a role, falling back to the backend default.
    pub fn role_model(&self, role: &str) -> Option<String> {
        let specific = match role {
            "planner" | "plan_judge" => &self.planner_model,
            "worker" => &self.worker_model,
            "judge" => &self.judge_model,
            _ => &None,
        };
        specific.clone().or_else(|| self.llm_model.clone())
    }

    /// Backup root lives next to the checkpoints, under the state dir.
    pub fn backup_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }
}

/// Read a key, treating the empty string as unset.
fn opt(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match opt(lookup, key) {
        None => Ok(default),
        Some(v) => match v.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => anyhow::bail!("{key} must be a boolean, got {other:?}"),
        },
    }
}

fn number(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> Result<f64> {
    match opt(lookup, key) {
        None => Ok(default),
        Some(v) => v
            .parse::<f64>()
            .with_context(|| format!("{key} must be numeric, got {v:?}")),
    }
}
