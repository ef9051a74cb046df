//! Prompt templates: flat text with `{placeholder}` substitution.
//!
//! Built-in templates ship with the binary; dropping a file with the same
//! name into the prompt override directory replaces one wholesale.

use std::path::PathBuf;
use tracing::warn;

const PLANNER_TEMPLATE: &str = include_str!("templates/planner.md");
const WORKER_TEMPLATE: &str = include_str!("templates/worker.md");
const JUDGE_TEMPLATE: &str = include_str!("templates/judge.md");
const PLAN_JUDGE_TEMPLATE: &str = include_str!("templates/plan_judge.md");

/// A loaded template ready to render.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Substitute `{name}` placeholders. Unknown placeholders are left in
    /// place so a malformed template is visible in the rendered prompt
    /// rather than silently blanked.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let mut rendered = self.text.clone();
        for (name, value) in vars {
            rendered = rendered.replace(&format!("{{{name}}}"), value);
        }
        rendered
    }
}

/// Resolves role templates, preferring overrides on disk.
pub struct PromptLibrary {
    override_dir: Option<PathBuf>,
}

impl PromptLibrary {
    pub fn new(override_dir: Option<PathBuf>) -> Self {
        Self { override_dir }
    }

    pub fn get(&self, role: &str) -> PromptTemplate {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(format!("{role}.md"));
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(text) => return PromptTemplate::new(text),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "unreadable prompt override")
                    }
                }
            }
        }
        PromptTemplate::new(match role {
            "planner" => PLANNER_TEMPLATE,
            "worker" => WORKER_TEMPLATE,
            "judge" => JUDGE_TEMPLATE,
            "plan_judge" => PLAN_JUDGE_TEMPLATE,
            _ => PLANNER_TEMPLATE,
        })
    }
}
