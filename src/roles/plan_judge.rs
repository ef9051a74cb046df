//! The Plan-Judge role: reviews the Planner's output within the same
//! iteration and either accepts it or asks for a revision.

use super::{Role, codebase_summary};
use crate::llm::InvokeMode;
use crate::prompts::PromptTemplate;
use crate::state::{StateSnapshot, StateStore};
use crate::util::{extract_json_fence, extract_json_object, now_iso, truncate_chars};
use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{info, warn};

pub struct PlanJudge {
    project_goal: String,
    working_dir: PathBuf,
    template: PromptTemplate,
    model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanReview {
    #[serde(default = "default_decision")]
    pub decision: String,
    #[serde(default = "default_score")]
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggested_changes: String,
    #[serde(skip)]
    pub parse_error: Option<String>,
}

fn default_decision() -> String {
    "accept".to_string()
}

fn default_score() -> f64 {
    0.5
}

impl PlanReview {
    pub fn is_accept(&self) -> bool {
        self.decision != "revise"
    }
}

impl PlanJudge {
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

    fn tasks_summary(&self, snapshot: &StateSnapshot, store: &StateStore) -> String {
        if snapshot.tasks.tasks.is_empty() {
            return "(no tasks yet)".to_string();
        }
        snapshot
            .tasks
            .tasks
            .iter()
            .map(|entry| {
                let (status, priority) = store
                    .task(&entry.id)
                    .ok()
                    .flatten()
                    .map(|t| (t.status.as_str(), t.priority.as_str()))
                    .unwrap_or(("unknown", entry.priority.as_str()));
                format!(
                    "- {}: {} (status: {status}, priority: {priority})",
                    entry.id, entry.title
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Role for PlanJudge {
    type Output = PlanReview;

    fn name(&self) -> &'static str {
        "plan_judge"
    }

    fn mode(&self) -> InvokeMode {
        InvokeMode::Ask
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
        Ok(self.template.render(&[
            ("project_goal", &self.project_goal),
            ("working_dir", &self.working_dir.to_string_lossy()),
            (
                "iteration",
                &snapshot.status.current_iteration.unwrap_or(0).to_string(),
            ),
            ("current_plan", plan),
            ("tasks_summary", &self.tasks_summary(snapshot, store)),
            ("codebase_summary", &codebase_summary(&self.working_dir)),
        ]))
    }

    fn parse(&self, response: &str) -> PlanReview {
        let json_text = extract_json_fence(response).or_else(|| extract_json_object(response));
        let Some(json_text) = json_text else {
            // Free-form feedback defaults to accept so a chatty reviewer
            // cannot wedge the planning loop.
            return PlanReview {
                decision: "accept".into(),
                score: 0.5,
                issues: Vec::new(),
                suggested_changes: truncate_chars(response, 500).to_string(),
                parse_error: Some("response was not JSON".into()),
            };
        };
        match serde_json::from_str::<PlanReview>(&json_text) {
            Ok(review) => review,
            Err(e) => {
                warn!(error = %e, "plan review JSON did not parse");
                PlanReview {
                    decision: "accept".into(),
                    score: 0.5,
                    issues: Vec::new(),
                    suggested_changes: format!(
                        "JSON parse error: {e}. Response: {}",
                        truncate_chars(response, 500)
                    ),
                    parse_error: Some(e.to_string()),
                }
            }
        }
    }

    fn apply(&self, review: &PlanReview, store: &StateStore) -> Result<()> {
        store.update_status(|status| {
            status.last_plan_judge_run = Some(now_iso());
            status.last_plan_judge_decision = Some(review.decision.clone());
            status.last_plan_judge_score = Some(review.score);
            status.last_plan_judge_feedback = Some(serde_json::json!({
                "decision": review.decision,
                "score": review.score,
                "issues": review.issues,
                "suggested_changes": review.suggested_changes,
            }));
        })?;
        info!(
            decision = %review.decision,
            score = review.score,
            issues = review.issues.len(),
            "plan review"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;
    use crate::prompts::PromptLibrary;
    use tempfile::TempDir;

    fn plan_judge(dir: &TempDir) -> PlanJudge {
        PlanJudge::new(
            "ship the tool",
            dir.path(),
            PromptLibrary::new(None).get("plan_judge"),
            None,
        )
    }

    #[test]
    fn parses_revise_decision() {
        let dir = TempDir::new().unwrap();
        let response = r#"```json
{"decision": "revise", "score": 0.3,
 "issues": ["tasks overlap on src/main.rs"],
 "suggested_changes": "split the scaffolding task"}
```"#;
        let review = plan_judge(&dir).parse(response);
        assert!(!review.is_accept());
        assert_eq!(review.score, 0.3);
        assert_eq!(review.issues.len(), 1);
    }

    #[test]
    fn free_form_feedback_defaults_to_accept() {
        let dir = TempDir::new().unwrap();
        let review = plan_judge(&dir).parse("Looks reasonable to me overall.");
        assert!(review.is_accept());
        assert!(review.parse_error.is_some());
        assert!(review.suggested_changes.contains("reasonable"));
    }

    #[test]
    fn apply_records_feedback_for_the_next_planner_run() {
        let dir = TempDir::new().unwrap();
        let store =
            StateStore::new(dir.path().join("state"), dir.path().join("state/backups")).unwrap();
        let review = PlanReview {
            decision: "revise".into(),
            score: 0.2,
            issues: vec!["missing files".into()],
            suggested_changes: "name the files".into(),
            parse_error: None,
        };
        plan_judge(&dir).apply(&review, &store).unwrap();

        let status = store.status().unwrap();
        assert_eq!(status.last_plan_judge_decision.as_deref(), Some("revise"));
        assert_eq!(status.last_plan_judge_score, Some(0.2));
        let feedback = status.last_plan_judge_feedback.unwrap();
        assert_eq!(feedback["issues"][0], "missing files");
    }

    #[test]
    fn prompt_lists_tasks_with_status_and_priority() {
        let dir = TempDir::new().unwrap();
        let store =
            StateStore::new(dir.path().join("state"), dir.path().join("state/backups")).unwrap();
        store
            .add_task(&NewTask {
                title: "first".into(),
                ..NewTask::default()
            })
            .unwrap();

        let snapshot = store.snapshot().unwrap();
        let prompt = plan_judge(&dir).render_prompt(&snapshot, &store).unwrap();
        assert!(prompt.contains("task_001: first (status: pending, priority: medium)"));
    }
}
