//! The LLM backend boundary: an opaque CLI invoked with a prompt and a
//! mode hint, returning free-form text.

pub mod cursor;
pub mod retry;

pub use cursor::CursorCliClient;

use crate::errors::OrchestratorError;
use async_trait::async_trait;
use std::path::PathBuf;

/// Guidance to the CLI about what the invocation may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeMode {
    /// Planning only.
    Plan,
    /// May modify files in the working directory.
    Agent,
    /// Read-only question answering.
    Ask,
}

impl InvokeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Agent => "agent",
            Self::Ask => "ask",
        }
    }

    /// `agent` is the CLI default and needs no flag.
    pub fn mode_flag(&self) -> Option<&'static str> {
        match self {
            Self::Agent => None,
            other => Some(other.as_str()),
        }
    }
}

/// One LLM invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub prompt: String,
    pub mode: InvokeMode,
    /// Backend default model when unset.
    pub model: Option<String>,
    /// Stream the combined output into this file as it arrives.
    pub log_path: Option<PathBuf>,
}

/// An LLM backend. Implementations classify their failures so the retry
/// envelope can tell transient from fatal.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, request: InvokeRequest) -> Result<String, OrchestratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_mode_needs_no_flag() {
        assert_eq!(InvokeMode::Agent.mode_flag(), None);
        assert_eq!(InvokeMode::Plan.mode_flag(), Some("plan"));
        assert_eq!(InvokeMode::Ask.mode_flag(), Some("ask"));
    }
}
