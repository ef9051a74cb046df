//! LLM-backed roles and the generic runner that executes them.
//!
//! A role supplies prompt rendering, response parsing, and a state
//! mutation; the runner sequences load → render → invoke (under the
//! retry envelope) → parse → apply → log, identically for every role.

pub mod judge;
pub mod plan_judge;
pub mod planner;
pub mod worker;

pub use judge::Judge;
pub use plan_judge::PlanJudge;
pub use planner::Planner;
pub use worker::Worker;

use crate::errors::OrchestratorError;
use crate::llm::cursor::call_log_path;
use crate::llm::retry::with_retry;
use crate::llm::{InvokeMode, InvokeRequest, LlmClient};
use crate::logging::RunLogger;
use crate::state::{StateSnapshot, StateStore};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// One pluggable role strategy.
pub trait Role: Send + Sync {
    /// Parsed response. Parsing is total: every role embeds its own
    /// fallback so the raw output is never lost.
    type Output: Send;

    fn name(&self) -> &'static str;
    fn mode(&self) -> InvokeMode;
    /// Model override for this invocation, `None` for the backend default.
    fn model(&self) -> Option<String>;
    fn render_prompt(&self, snapshot: &StateSnapshot, store: &StateStore) -> Result<String>;
    fn parse(&self, response: &str) -> Self::Output;
    fn apply(&self, output: &Self::Output, store: &StateStore) -> Result<()>;
}

/// Executes roles against the shared state store and LLM client.
pub struct RoleRunner {
    client: Arc<dyn LlmClient>,
    store: Arc<StateStore>,
    logger: Arc<RunLogger>,
    max_retries: u32,
}

impl RoleRunner {
    pub fn new(
        client: Arc<dyn LlmClient>,
        store: Arc<StateStore>,
        logger: Arc<RunLogger>,
        max_retries: u32,
    ) -> Self {
        Self {
            client,
            store,
            logger,
            max_retries,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Run one role invocation. Retryable LLM failures back off inside
    /// the envelope; exhaustion surfaces as an agent error. A parse
    /// failure is never fatal — the role's fallback output is applied.
    pub async fn run<R: Role>(
        &self,
        role: &R,
        iteration: u32,
    ) -> Result<R::Output, OrchestratorError> {
        let started = Instant::now();
        let name = role.name();

        let snapshot = self
            .store
            .snapshot()
            .map_err(|e| OrchestratorError::agent(name, e.into()))?;
        let prompt = role
            .render_prompt(&snapshot, &self.store)
            .map_err(|e| OrchestratorError::agent(name, e.into()))?;

        let model = role.model();
        info!(
            agent = name,
            iteration,
            mode = role.mode().as_str(),
            model = model.as_deref().unwrap_or("default"),
            "starting run"
        );

        let request = InvokeRequest {
            prompt: prompt.clone(),
            mode: role.mode(),
            model: model.clone(),
            log_path: Some(call_log_path(self.logger.log_dir(), name)),
        };
        let response = match with_retry(self.max_retries, name, |_| {
            self.client.invoke(request.clone())
        })
        .await
        {
            Ok(response) => response,
            Err(e) => {
                self.logger.log_error(
                    name,
                    &e,
                    serde_json::json!({"iteration": iteration, "max_retries": self.max_retries}),
                );
                error!(agent = name, error = %e, "LLM invocation failed");
                return Err(if e.is_retryable() {
                    // Retries are spent; reclassify so nothing upstream
                    // retries a dead call again.
                    OrchestratorError::agent(name, Box::new(e))
                } else {
                    e
                });
            }
        };

        let output = role.parse(&response);

        if let Err(e) = role.apply(&output, &self.store) {
            let err = OrchestratorError::agent(name, e.into());
            self.logger
                .log_error(name, &err, serde_json::json!({"iteration": iteration}));
            error!(agent = name, error = %err, "state mutation failed");
            return Err(err);
        }

        self.logger.log_agent_run(
            name,
            iteration,
            prompt.len(),
            response.len(),
            started.elapsed().as_secs_f64(),
            role.mode().as_str(),
            model.as_deref(),
        );
        Ok(output)
    }
}

/// Enumerate source files under the working directory for prompt context,
/// capped at 20 listed entries.
pub fn codebase_summary(working_dir: &Path) -> String {
    const SOURCE_EXTENSIONS: [&str; 12] = [
        "rs", "py", "ts", "js", "go", "java", "rb", "c", "cpp", "h", "toml", "md",
    ];
    const LIST_CAP: usize = 20;

    let files: Vec<String> = walkdir::WalkDir::new(working_dir)
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !(name.starts_with('.') || name == "target" || name == "node_modules")
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
        })
        .filter_map(|e| {
            e.path()
                .strip_prefix(working_dir)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        })
        .collect();

    if files.is_empty() {
        return "(no source files found)".to_string();
    }
    if files.len() > LIST_CAP {
        return format!("The codebase has {} source files.", files.len());
    }
    let mut listed: Vec<String> = files.iter().map(|f| format!("- {f}")).collect();
    listed.sort();
    format!("Main files:\n{}", listed.join("\n"))
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted LLM client for role and driver tests.

    use super::*;
    use std::sync::Mutex;

    pub struct ScriptedClient {
        responses: Mutex<Vec<Result<String, fn() -> OrchestratorError>>>,
        pub calls: Mutex<Vec<InvokeRequest>>,
    }

    impl ScriptedClient {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn push_ok(self, response: &str) -> Self {
            self.responses.lock().unwrap().push(Ok(response.to_string()));
            self
        }

        pub fn push_err(self, make: fn() -> OrchestratorError) -> Self {
            self.responses.lock().unwrap().push(Err(make));
            self
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for ScriptedClient {
        async fn invoke(&self, request: InvokeRequest) -> Result<String, OrchestratorError> {
            self.calls.lock().unwrap().push(request);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(String::new());
            }
            match responses.remove(0) {
                Ok(response) => Ok(response),
                Err(make) => Err(make()),
            }
        }
    }
}
