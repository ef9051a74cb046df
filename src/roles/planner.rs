//! The Planner role: turns the project goal and current state into a
//! plan update and a batch of new or revised tasks.

use super::{Role, codebase_summary};
use crate::llm::InvokeMode;
use crate::models::NewTask;
use crate::prompts::PromptTemplate;
use crate::scheduler::extract_file_refs;
use crate::state::{StateSnapshot, StateStore};
use crate::util::{extract_json_fence, extract_json_object, now_iso};
use anyhow::Result;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::{info, warn};

pub struct Planner {
    project_goal: String,
    working_dir: PathBuf,
    template: PromptTemplate,
    model: Option<String>,
}

/// Parsed planner response. A non-JSON response degrades into a plan
/// overwrite carrying the raw text, so nothing is lost.
#[derive(Debug, Default)]
pub struct PlannerOutput {
    pub plan_update: Option<String>,
    pub new_tasks: Vec<NewTask>,
    pub updated_tasks: Vec<Map<String, Value>>,
    pub reasoning: Option<String>,
    pub parse_error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PlannerJson {
    #[serde(default)]
    plan_update: String,
    #[serde(default)]
    new_tasks: Vec<Value>,
    #[serde(default)]
    updated_tasks: Vec<Value>,
    #[serde(default)]
    reasoning: String,
}

impl Planner {
    pub fn new(
        project_goal: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        template: PromptTemplate,
        model: Option<String>,
    ) -> Self {
        Self {
            project_goal: project_goal.into(),
            working_dir: working_dir.into(),
            template,
            model,
        }
    }

    fn existing_tasks(&self, snapshot: &StateSnapshot, store: &StateStore) -> String {
        if snapshot.tasks.tasks.is_empty() {
            return "(none yet)".to_string();
        }
        let mut lines = Vec::with_capacity(snapshot.tasks.tasks.len());
        for entry in &snapshot.tasks.tasks {
            // Status comes from the per-task file, never the index.
            let status = store
                .task(&entry.id)
                .ok()
                .flatten()
                .map(|t| t.status.as_str())
                .unwrap_or("unknown");
            lines.push(format!("- {}: {} ({status})", entry.id, entry.title));
        }
        lines.join("\n")
    }
}

impl Role for Planner {
    type Output = PlannerOutput;

    fn name(&self) -> &'static str {
        "planner"
    }

    fn mode(&self) -> InvokeMode {
        InvokeMode::Plan
    }

    fn model(&self) -> Option<String> {
        self.model.clone()
    }

    fn render_prompt(&self, snapshot: &StateSnapshot, store: &StateStore) -> Result<String> {
        let plan = if snapshot.plan.is_empty() {
            "(no plan yet)"
        } else {
            &snapshot.plan
        };
        let feedback = snapshot
            .status
            .last_plan_judge_feedback
            .as_ref()
            .map(|f| serde_json::to_string_pretty(f).unwrap_or_default())
            .unwrap_or_else(|| "(none)".to_string());
        let verdict = match &snapshot.status.reason {
            Some(reason) => format!(
                "should_continue={}, progress_score={}, reason: {reason}",
                snapshot.status.should_continue(),
                snapshot.status.progress_score.unwrap_or(0.0),
            ),
            None => "(none)".to_string(),
        };

        Ok(self.template.render(&[
            ("project_goal", &self.project_goal),
            ("working_dir", &self.working_dir.to_string_lossy()),
            ("current_plan", plan),
            ("existing_tasks", &self.existing_tasks(snapshot, store)),
            ("codebase_summary", &codebase_summary(&self.working_dir)),
            ("plan_feedback", &feedback),
            ("last_verdict", &verdict),
        ]))
    }

    fn parse(&self, response: &str) -> PlannerOutput {
        let json_text = extract_json_fence(response).or_else(|| extract_json_object(response));
        let Some(json_text) = json_text else {
            return PlannerOutput {
                plan_update: Some(response.to_string()),
                reasoning: Some("response was not JSON".to_string()),
                parse_error: Some("response was not JSON".to_string()),
                ..PlannerOutput::default()
            };
        };

        match serde_json::from_str::<PlannerJson>(&json_text) {
            Ok(parsed) => {
                let new_tasks = parsed
                    .new_tasks
                    .into_iter()
                    .filter_map(|v| match serde_json::from_value::<NewTask>(v) {
                        Ok(task) => Some(task),
                        Err(e) => {
                            warn!(error = %e, "dropping malformed new_tasks entry");
                            None
                        }
                    })
                    .collect();
                let updated_tasks = parsed
                    .updated_tasks
                    .into_iter()
                    .filter_map(|v| v.as_object().cloned())
                    .collect();
                PlannerOutput {
                    plan_update: (!parsed.plan_update.is_empty()).then_some(parsed.plan_update),
                    new_tasks,
                    updated_tasks,
                    reasoning: (!parsed.reasoning.is_empty()).then_some(parsed.reasoning),
                    parse_error: None,
                }
            }
            Err(e) => PlannerOutput {
                plan_update: Some(response.to_string()),
                reasoning: Some(format!("JSON parse error: {e}")),
                parse_error: Some(e.to_string()),
                ..PlannerOutput::default()
            },
        }
    }

    fn apply(&self, output: &PlannerOutput, store: &StateStore) -> Result<()> {
        if let Some(plan) = &output.plan_update {
            store.save_plan(plan)?;
            info!("plan updated");
        }

        for updated in &output.updated_tasks {
            let Some(task_id) = updated.get("id").and_then(Value::as_str) else {
                warn!("updated_tasks entry without id");
                continue;
            };
            let mut patch = updated.clone();
            patch.remove("id");
            if patch.is_empty() {
                continue;
            }
            match store.update_task(task_id, patch) {
                Ok(()) => info!(task_id, "task updated"),
                Err(e) => warn!(task_id, error = %e, "failed to update task"),
            }
        }

        for new_task in &output.new_tasks {
            let mut task = new_task.clone();
            if task.files.is_empty() {
                task.files = extract_file_refs(&task.description);
            }
            let task_id = store.add_task(&task)?;
            info!(task_id, title = %task.title, "task added");
        }

        let total = store.tasks_file()?.tasks.len();
        store.update_status(|status| {
            status.last_planner_run = Some(now_iso());
            status.total_tasks = Some(total);
        })?;
        Ok(())
    }
}
