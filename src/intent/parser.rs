//! Extracts the structured intent block from a Worker report.
//!
//! Section headers are configuration, not grammar: the defaults are the
//! Japanese headers of the built-in worker template, and deployments with
//! different templates swap in their own `IntentHeadings`.

use crate::models::{CommitRef, Intent, IntentBody};
use crate::util::{now_iso, truncate_chars};
use regex::Regex;

/// The headers the parser scans for.
#[derive(Debug, Clone)]
pub struct IntentHeadings {
    /// `##` section that opens the intent block.
    pub section: String,
    /// `###` sub-headers inside the block.
    pub goal: String,
    pub rationale: String,
    pub expected_change: String,
    pub non_goals: String,
    pub risk: String,
    /// `##` section the intent block runs up to, and the fallback source
    /// for a goal when no intent block exists.
    pub implementation: String,
    /// Second possible end boundary of the intent block.
    pub files_changed: String,
    /// Inline labels.
    pub commit_hash_label: String,
    pub commit_message_label: String,
    pub related_adr_label: String,
}

impl Default for IntentHeadings {
    fn default() -> Self {
        Self {
            section: "変更意図 (Intent)".into(),
            goal: "目標 (Goal)".into(),
            rationale: "理由 (Rationale)".into(),
            expected_change: "期待される変更 (Expected Change)".into(),
            non_goals: "非目標 (Non-Goals)".into(),
            risk: "リスク (Risk)".into(),
            implementation: "実装内容".into(),
            files_changed: "変更したファイル".into(),
            commit_hash_label: "コミットハッシュ".into(),
            commit_message_label: "コミットメッセージ".into(),
            related_adr_label: "関連ADR".into(),
        }
    }
}

pub struct IntentParser {
    section: Regex,
    goal: Regex,
    rationale: Regex,
    expected_change: Regex,
    non_goals: Regex,
    risk: Regex,
    implementation: Regex,
    commit_hash: Regex,
    commit_message: Regex,
    related_adr: Regex,
    list_item: Regex,
}

impl IntentParser {
    pub fn new(headings: &IntentHeadings) -> Self {
        let sub = |name: &str, boundary: &str| {
            Regex::new(&format!(
                r"(?s)### {}\s*\n(.+?)(?:{boundary}|$)",
                regex::escape(name)
            ))
            .expect("valid sub-section pattern")
        };
        Self {
            section: Regex::new(&format!(
                r"(?s)## {}(.*?)(?:## {}|## {}|$)",
                regex::escape(&headings.section),
                regex::escape(&headings.implementation),
                regex::escape(&headings.files_changed),
            ))
            .expect("valid section pattern"),
            goal: sub(&headings.goal, "###"),
            rationale: sub(&headings.rationale, "###"),
            expected_change: sub(&headings.expected_change, "###"),
            non_goals: sub(&headings.non_goals, "###"),
            risk: sub(&headings.risk, "###|##"),
            implementation: Regex::new(&format!(
                r"(?s)## {}\s*\n(.+?)(?:##|$)",
                regex::escape(&headings.implementation)
            ))
            .expect("valid implementation pattern"),
            commit_hash: Regex::new(&format!(
                r"(?i)[-*]*\s*\**{}\**[:\s]+([a-f0-9]+)",
                regex::escape(&headings.commit_hash_label)
            ))
            .expect("valid commit hash pattern"),
            commit_message: Regex::new(&format!(
                r"(?m)[-*]*\s*\**{}\**[:\s]+(.+)",
                regex::escape(&headings.commit_message_label)
            ))
            .expect("valid commit message pattern"),
            related_adr: Regex::new(&format!(
                r"(?i){}[:\s]+(?:ADR-)?(\d+)",
                regex::escape(&headings.related_adr_label)
            ))
            .expect("valid related ADR pattern"),
            list_item: Regex::new(r"(?m)^[-*]\s+(.+)$").expect("valid list pattern"),
        }
    }

    pub fn has_intent_section(&self, response: &str) -> bool {
        self.section.is_match(response)
    }

    /// Parse a Worker response into an intent record. Without an explicit
    /// intent section, a minimal record is produced only when a commit
    /// hash was found, with the goal sampled from the implementation
    /// section.
    pub fn parse(&self, response: &str, task_id: &str) -> Option<Intent> {
        let commit_hash = self.commit_hash(response);
        let commit_message = self.commit_message(response);

        let Some(section) = self
            .section
            .captures(response)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
        else {
            return self.parse_fallback(response, task_id, commit_hash, commit_message);
        };

        let mut intent = Intent::new(task_id);
        intent.intent = IntentBody {
            goal: self.scalar(&self.goal, section),
            rationale: self.scalar(&self.rationale, section),
            expected_change: self.list(&self.expected_change, section),
            non_goals: self.list(&self.non_goals, section),
            risk: self.list(&self.risk, section),
        };
        if let Some(hash) = commit_hash {
            intent.commits.push(CommitRef {
                hash,
                message: commit_message,
                timestamp: Some(now_iso()),
            });
        }
        intent.related_adr = self.related_adr(response);
        Some(intent)
    }

    fn parse_fallback(
        &self,
        response: &str,
        task_id: &str,
        commit_hash: Option<String>,
        commit_message: Option<String>,
    ) -> Option<Intent> {
        let hash = commit_hash?;
        let mut intent = Intent::new(task_id);
        intent.intent.goal = self
            .implementation
            .captures(response)
            .and_then(|c| c.get(1))
            .map(|m| truncate_chars(m.as_str().trim(), 200).to_string());
        intent.commits.push(CommitRef {
            hash,
            message: commit_message,
            timestamp: Some(now_iso()),
        });
        Some(intent)
    }

    pub fn commit_hash(&self, response: &str) -> Option<String> {
        self.commit_hash
            .captures(response)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    pub fn commit_message(&self, response: &str) -> Option<String> {
        self.commit_message
            .captures(response)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    }

    pub fn related_adr(&self, response: &str) -> Option<String> {
        self.related_adr
            .captures(response)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn scalar(&self, pattern: &Regex, section: &str) -> Option<String> {
        pattern
            .captures(section)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn list(&self, pattern: &Regex, section: &str) -> Vec<String> {
        let Some(body) = pattern.captures(section).and_then(|c| c.get(1)) else {
            return Vec::new();
        };
        self.list_item
            .captures_iter(body.as_str())
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl Default for IntentParser {
    fn default() -> Self {
        Self::new(&IntentHeadings::default())
    }
}
