//! The Judge role: evaluates loop progress after each worker batch and
//! decides whether the loop continues.

use super::Role;
use crate::llm::InvokeMode;
use crate::prompts::PromptTemplate;
use crate::state::{StateSnapshot, StateStore};
use crate::util::{extract_json_fence, extract_json_object, now_iso, truncate_chars};
use anyhow::Result;
use serde::Deserialize;
use tracing::{info, warn};

/// How many recent completed-task reports the prompt carries.
const REPORT_SNIPPETS: usize = 5;
const SNIPPET_CHARS: usize = 200;

pub struct Judge {
    project_goal: String,
    template: PromptTemplate,
    model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JudgeVerdict {
    #[serde(default = "default_continue")]
    pub should_continue: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_score")]
    pub progress_score: f64,
    #[serde(default)]
    pub drift_detected: bool,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub next_iteration_focus: Option<String>,
    #[serde(default)]
    pub drift_description: Option<String>,
}

fn default_continue() -> bool {
    true
}

fn default_score() -> f64 {
    0.5
}

#[derive(Debug)]
pub struct JudgeOutput {
    pub verdict: JudgeVerdict,
    pub parse_error: Option<String>,
}

impl Judge {
    pub fn new(
        project_goal: impl Into<String>,
        template: PromptTemplate,
        model: Option<String>,
    ) -> Self {
        Self {
            project_goal: project_goal.into(),
            template,
            model,
        }
    }

    fn completed_reports(&self, store: &StateStore) -> Result<String> {
        let completed: Vec<_> = store
            .all_tasks()?
            .into_iter()
            .filter(|t| t.is_completed())
            .collect();
        if completed.is_empty() {
            return Ok("(no completed tasks yet)".to_string());
        }

        let mut snippets = Vec::new();
        for task in completed.iter().rev().take(REPORT_SNIPPETS).rev() {
            let Some(result_file) = &task.result_file else {
                continue;
            };
            let content = store.read_text(result_file).unwrap_or_default();
            snippets.push(format!(
                "### {}: {}\n{}...",
                task.id,
                task.title,
                truncate_chars(&content, SNIPPET_CHARS)
            ));
        }
        Ok(snippets.join("\n\n"))
    }

    /// Heuristic verdict for a response with no parseable JSON: look for
    /// continuation keywords and surface the raw text as the reason.
    fn fallback_verdict(response: &str, error: Option<String>) -> JudgeOutput {
        let lowered = response.to_lowercase();
        let should_continue =
            response.contains("継続") || lowered.contains("continue") || lowered.contains("true");
        let prefix = match &error {
            Some(e) => format!("JSON parse error: {e}. Response: "),
            None => String::new(),
        };
        JudgeOutput {
            verdict: JudgeVerdict {
                should_continue,
                reason: format!("{prefix}{}", truncate_chars(response, 500)),
                progress_score: 0.5,
                drift_detected: false,
                recommendations: Vec::new(),
                next_iteration_focus: None,
                drift_description: None,
            },
            parse_error: error.or_else(|| Some("response was not JSON".to_string())),
        }
    }
}

impl Role for Judge {
    type Output = JudgeOutput;

    fn name(&self) -> &'static str {
        "judge"
    }

    fn mode(&self) -> InvokeMode {
        InvokeMode::Ask
    }

    fn model(&self) -> Option<String> {
        self.model.clone()
    }

    fn render_prompt(&self, snapshot: &StateSnapshot, store: &StateStore) -> Result<String> {
        let stats = store.statistics()?;
        let plan = if snapshot.plan.is_empty() {
            "(no plan yet)"
        } else {
            &snapshot.plan
        };
        let iteration = snapshot.status.current_iteration.unwrap_or(0);

        Ok(self.template.render(&[
            ("project_goal", &self.project_goal),
            ("current_plan", plan),
            ("total_tasks", &stats.total.to_string()),
            ("completed_tasks", &stats.completed.to_string()),
            ("failed_tasks", &stats.failed.to_string()),
            ("pending_tasks", &stats.pending.to_string()),
            ("iteration", &iteration.to_string()),
            ("completed_task_results", &self.completed_reports(store)?),
        ]))
    }

    fn parse(&self, response: &str) -> JudgeOutput {
        let json_text = extract_json_fence(response).or_else(|| extract_json_object(response));
        let Some(json_text) = json_text else {
            return Self::fallback_verdict(response, None);
        };
        match serde_json::from_str::<JudgeVerdict>(&json_text) {
            Ok(verdict) => JudgeOutput {
                verdict,
                parse_error: None,
            },
            Err(e) => {
                warn!(error = %e, "judge response JSON did not parse");
                Self::fallback_verdict(response, Some(e.to_string()))
            }
        }
    }

    fn apply(&self, output: &JudgeOutput, store: &StateStore) -> Result<()> {
        let verdict = &output.verdict;
        store.update_status(|status| {
            status.last_judge_run = Some(now_iso());
            status.should_continue = Some(verdict.should_continue);
            status.reason = Some(verdict.reason.clone());
            status.progress_score = Some(verdict.progress_score);
            status.drift_detected = Some(verdict.drift_detected);
            status.extra.insert(
                "recommendations".into(),
                serde_json::json!(verdict.recommendations),
            );
            if let Some(focus) = &verdict.next_iteration_focus {
                status
                    .extra
                    .insert("next_iteration_focus".into(), focus.clone().into());
            }
            if let Some(drift) = &verdict.drift_description {
                status
                    .extra
                    .insert("drift_description".into(), drift.clone().into());
            }
        })?;

        info!(
            should_continue = verdict.should_continue,
            progress_score = verdict.progress_score,
            reason = %truncate_chars(&verdict.reason, 100),
            "judge verdict"
        );
        if verdict.drift_detected {
            warn!(
                description = verdict.drift_description.as_deref().unwrap_or("n/a"),
                "drift detected"
            );
        }
        Ok(())
    }
}
