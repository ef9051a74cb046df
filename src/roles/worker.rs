//! The Worker role: executes one assigned task by driving the LLM with
//! write access, then records the completion report and change intent.

use super::Role;
use crate::gitinfo::CommitLookup;
use crate::intent::{IntentParser, IntentTracker};
use crate::llm::InvokeMode;
use crate::models::{ModelSelector, Task, TaskResult};
use crate::prompts::PromptTemplate;
use crate::scheduler::extract_file_refs;
use crate::state::{StateSnapshot, StateStore};
use crate::util::now_iso;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Header that opens the structured completion report in the built-in
/// worker template.
const REPORT_HEADER: &str = "# タスク完了レポート";

pub struct Worker {
    task: Task,
    working_dir: PathBuf,
    template: PromptTemplate,
    selector: ModelSelector,
    parser: IntentParser,
    intents: Arc<IntentTracker>,
    commits: Arc<CommitLookup>,
}

/// Parsed worker response. Parsing never fails outright: a report that
/// matches nothing still completes the task with the raw text.
#[derive(Debug)]
pub struct WorkerOutput {
    pub task_id: String,
    pub report: String,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    pub intent: Option<crate::models::Intent>,
}

impl Worker {
    pub fn new(
        task: Task,
        working_dir: impl Into<PathBuf>,
        template: PromptTemplate,
        selector: ModelSelector,
        parser: IntentParser,
        intents: Arc<IntentTracker>,
        commits: Arc<CommitLookup>,
    ) -> Self {
        Self {
            task,
            working_dir: working_dir.into(),
            template,
            selector,
            parser,
            intents,
            commits,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    fn related_files(&self) -> String {
        let mut files = self.task.files.clone();
        for file in extract_file_refs(&self.task.description) {
            if !files.contains(&file) {
                files.push(file);
            }
        }
        if files.is_empty() {
            return "(no related file information)".to_string();
        }
        files
            .iter()
            .map(|f| format!("- {f}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Role for Worker {
    type Output = WorkerOutput;

    fn name(&self) -> &'static str {
        "worker"
    }

    fn mode(&self) -> InvokeMode {
        InvokeMode::Agent
    }

    /// Per-task model, chosen by complexity when selection is enabled.
    fn model(&self) -> Option<String> {
        let selected = self.selector.select(&self.task);
        let band = self.selector.band(&self.task);
        if band != crate::models::complexity::ComplexityBand::Default {
            info!(
                task_id = %self.task.id,
                band = band.as_str(),
                score = ModelSelector::complexity_score(&self.task),
                model = selected.as_deref().unwrap_or("default"),
                "worker model selected"
            );
        }
        selected
    }

    fn render_prompt(&self, _snapshot: &StateSnapshot, _store: &StateStore) -> Result<String> {
        Ok(self.template.render(&[
            ("task_id", &self.task.id),
            ("task_title", &self.task.title),
            ("task_description", &self.task.description),
            ("related_files", &self.related_files()),
            ("working_dir", &self.working_dir.to_string_lossy()),
        ]))
    }

    fn parse(&self, response: &str) -> WorkerOutput {
        // The structured report section when present, else the whole
        // response — raw output is never dropped.
        let report = match response.find(REPORT_HEADER) {
            Some(at) => response[at..].to_string(),
            None => response.to_string(),
        };

        WorkerOutput {
            task_id: self.task.id.clone(),
            report,
            commit_hash: self.parser.commit_hash(response),
            commit_message: self.parser.commit_message(response),
            intent: self.parser.parse(response, &self.task.id),
        }
    }

    fn apply(&self, output: &WorkerOutput, store: &StateStore) -> Result<()> {
        let result = TaskResult {
            report: output.report.clone(),
            success: true,
            error_message: None,
            commit_hash: output.commit_hash.clone(),
            commit_message: output.commit_message.clone(),
        };
        store.complete_task(&output.task_id, &result)?;
        info!(task_id = %output.task_id, "task completed");

        if let Some(intent) = &output.intent {
            let mut intent = intent.clone();
            intent.commits = intent
                .commits
                .into_iter()
                .map(|c| self.commits.enrich(c))
                .collect();
            match self.intents.save(&intent) {
                Ok(path) => info!(task_id = %output.task_id, path = %path.display(), "intent saved"),
                Err(e) => warn!(task_id = %output.task_id, error = %e, "failed to save intent"),
            }
        }

        let completed = store.statistics()?.completed;
        store.update_status(|status| {
            status.last_worker_run = Some(now_iso());
            status.completed_tasks = Some(completed);
        })?;
        Ok(())
    }
}
