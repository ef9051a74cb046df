//! Typed error hierarchy for the maestro orchestrator.
//!
//! Every failure the loop has to react to is one variant of
//! `OrchestratorError`, tagged with whether the retry envelope may retry
//! it. Retryable: rate limits, LLM timeouts, generic LLM failures.
//! Everything else propagates immediately.

use thiserror::Error;

/// Boxed error cause, kept on variants so the original failure is never
/// lost when an error is reclassified on its way up.
pub type ErrorSource = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("LLM rate limit: {message}")]
    RateLimit { message: String },

    #[error("LLM call timed out after {seconds} seconds")]
    Timeout {
        seconds: u64,
        #[source]
        source: Option<ErrorSource>,
    },

    #[error("LLM error: {message}")]
    Llm {
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },

    #[error("{tool} not found on PATH: {message}")]
    MissingTool { tool: String, message: String },

    #[error("configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },

    #[error("state file corrupted: {filename}")]
    StateCorruption {
        filename: String,
        #[source]
        source: Option<ErrorSource>,
    },

    #[error("state missing: {0}")]
    StateMissing(String),

    #[error("task {task_id}: {message}")]
    Task { task_id: String, message: String },

    #[error("agent {agent}: {message}")]
    Agent {
        agent: String,
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },
}

impl OrchestratorError {
    /// Whether the retry envelope is allowed to retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. } | Self::Timeout { .. } | Self::Llm { .. }
        )
    }

    /// Wrap an arbitrary failure as a non-retryable agent error, keeping
    /// the original as the cause.
    pub fn agent(agent: impl Into<String>, source: ErrorSource) -> Self {
        Self::Agent {
            agent: agent.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Short kind tag used in the JSONL error log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimit { .. } => "rate-limit",
            Self::Timeout { .. } => "timeout",
            Self::Llm { .. } => "generic-llm",
            Self::MissingTool { .. } => "fatal-missing-tool",
            Self::Config { .. } => "fatal-config",
            Self::StateCorruption { .. } => "state-corruption",
            Self::StateMissing(_) => "state-missing",
            Self::Task { .. } => "task-error",
            Self::Agent { .. } => "agent-error",
        }
    }
}
