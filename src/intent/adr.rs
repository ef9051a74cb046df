//! Architecture Decision Records: numbered Markdown documents under
//! `docs/adr/`, linked back to task intents.
//!
//! The orchestrator tracks ADRs but never authors decisions itself — it
//! seeds the template, allocates numbers, and maintains the related-
//! intent back-references.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;

static ADR_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(.+)\.md$").unwrap());
static ADR_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^# ADR-\d+: (.+)$").unwrap());
static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[-*]\s+(.+)$").unwrap());

const TEMPLATE: &str = r#"# ADR-{number}: {title}

## ステータス
Proposed / Accepted / Deprecated / Superseded

## コンテキスト
[決定の背景となる状況や問題を記述してください]

## 決定
[採用した決定の内容を記述してください]

## 理由
[決定の理由を記述してください]

## 結果
[決定による影響・結果を記述してください]

## 関連Intent
- [関連するタスクIDをリストしてください]
"#;

/// A parsed ADR document.
#[derive(Debug, Clone)]
pub struct AdrRecord {
    pub number: String,
    pub title: String,
    pub status: String,
    pub related_intents: Vec<String>,
    pub path: PathBuf,
    pub content: String,
}

/// Fields for a new ADR. Empty sections fall back to template prompts.
#[derive(Debug, Clone, Default)]
pub struct AdrDraft {
    pub title: String,
    pub context: String,
    pub decision: String,
    pub rationale: String,
    pub consequences: String,
    pub related_intents: Vec<String>,
    pub status: Option<String>,
}

pub struct AdrManager {
    adr_dir: PathBuf,
}

impl AdrManager {
    pub fn new(adr_dir: impl Into<PathBuf>) -> Result<Self> {
        let adr_dir = adr_dir.into();
        fs::create_dir_all(&adr_dir).context("Failed to create ADR directory")?;
        let template_path = adr_dir.join("template.md");
        if !template_path.exists() {
            fs::write(&template_path, TEMPLATE).context("Failed to seed ADR template")?;
        }
        Ok(Self { adr_dir })
    }

    /// Highest existing ADR number plus one.
    pub fn next_number(&self) -> u32 {
        let Ok(entries) = fs::read_dir(&self.adr_dir) else {
            return 1;
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name();
                ADR_FILENAME
                    .captures(name.to_str()?)
                    .and_then(|c| c.get(1)?.as_str().parse::<u32>().ok())
            })
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Create a new ADR file. Returns the zero-padded number.
    pub fn create(&self, draft: &AdrDraft) -> Result<String> {
        let number = format!("{:04}", self.next_number());
        let filename = format!("{number}-{}.md", slugify(&draft.title));

        let intents = if draft.related_intents.is_empty() {
            "- なし".to_string()
        } else {
            draft
                .related_intents
                .iter()
                .map(|id| format!("- {id}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let section = |value: &str, prompt: &str| {
            if value.is_empty() {
                prompt.to_string()
            } else {
                value.to_string()
            }
        };

        let content = format!(
            r#"# ADR-{number}: {title}

## ステータス
{status}

## コンテキスト
{context}

## 決定
{decision}

## 理由
{rationale}

## 結果
{consequences}

## 関連Intent
{intents}
"#,
            title = draft.title,
            status = draft.status.as_deref().unwrap_or("Proposed"),
            context = section(&draft.context, "[決定の背景となる状況や問題]"),
            decision = section(&draft.decision, "[採用した決定の内容]"),
            rationale = section(&draft.rationale, "[決定の理由]"),
            consequences = section(&draft.consequences, "[決定による影響・結果]"),
        );

        let path = self.adr_dir.join(filename);
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(number)
    }

    /// Load an ADR by number (zero-padded or not).
    pub fn get(&self, number: &str) -> Result<Option<AdrRecord>> {
        let number = format!("{:0>4}", number);
        let pattern = self.adr_dir.join(format!("{number}-*.md"));
        let matches = glob::glob(&pattern.to_string_lossy())
            .context("Failed to scan ADR directory")?
            .filter_map(|p| p.ok());

        for path in matches {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let title = ADR_TITLE
                .captures(&content)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "Unknown".to_string());
            let status = section_body(&content, "ステータス")
                .map(|s| s.lines().next().unwrap_or("").trim().to_string())
                .unwrap_or_else(|| "Unknown".to_string());
            let related_intents = section_body(&content, "関連Intent")
                .map(|body| {
                    LIST_ITEM
                        .captures_iter(&body)
                        .filter_map(|c| c.get(1))
                        .map(|m| m.as_str().trim().to_string())
                        .filter(|s| s != "なし")
                        .collect()
                })
                .unwrap_or_default();
            return Ok(Some(AdrRecord {
                number,
                title,
                status,
                related_intents,
                path,
                content,
            }));
        }
        Ok(None)
    }

    /// All ADRs, in number order.
    pub fn all(&self) -> Result<Vec<AdrRecord>> {
        let Ok(entries) = fs::read_dir(&self.adr_dir) else {
            return Ok(Vec::new());
        };
        let mut numbers: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name();
                ADR_FILENAME
                    .captures(name.to_str()?)
                    .map(|c| c.get(1).unwrap().as_str().to_string())
            })
            .collect();
        numbers.sort();

        let mut records = Vec::with_capacity(numbers.len());
        for number in numbers {
            if let Some(record) = self.get(&number)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Rewrite the status section of an ADR in place.
    pub fn update_status(&self, number: &str, new_status: &str) -> Result<bool> {
        let Some(record) = self.get(number)? else {
            return Ok(false);
        };
        let updated = replace_section(&record.content, "ステータス", new_status);
        fs::write(&record.path, updated)
            .with_context(|| format!("Failed to write {}", record.path.display()))?;
        Ok(true)
    }

    /// Add a task id to an ADR's related-intent list, in place. No-op when
    /// the id is already listed.
    pub fn add_related_intent(&self, number: &str, task_id: &str) -> Result<bool> {
        let Some(record) = self.get(number)? else {
            return Ok(false);
        };
        if record.related_intents.iter().any(|id| id == task_id) {
            return Ok(true);
        }

        let updated = match section_body(&record.content, "関連Intent") {
            Some(existing) => {
                let trimmed = existing.trim();
                let new_list = if trimmed == "- なし" {
                    format!("- {task_id}")
                } else {
                    format!("{trimmed}\n- {task_id}")
                };
                replace_section(&record.content, "関連Intent", &new_list)
            }
            None => format!("{}\n\n## 関連Intent\n- {task_id}\n", record.content.trim_end()),
        };
        fs::write(&record.path, updated)
            .with_context(|| format!("Failed to write {}", record.path.display()))?;
        Ok(true)
    }
}

fn section_pattern(header: &str) -> Regex {
    Regex::new(&format!(
        r"(?ms)^## {}\s*\n(.+?)(?:\n##|\z)",
        regex::escape(header)
    ))
    .expect("valid section pattern")
}

fn section_body(content: &str, header: &str) -> Option<String> {
    section_pattern(header)
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn replace_section(content: &str, header: &str, new_body: &str) -> String {
    let pattern = section_pattern(header);
    match pattern.captures(content).and_then(|c| c.get(1)) {
        Some(body) => {
            let mut updated = String::with_capacity(content.len());
            updated.push_str(&content[..body.start()]);
            updated.push_str(new_body);
            updated.push('\n');
            updated.push_str(content[body.end()..].trim_start_matches('\n'));
            updated
        }
        None => content.to_string(),
    }
}

fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let mut slug = String::new();
    let mut last_dash = true;
    for c in cleaned.chars() {
        if c == '-' {
            if !last_dash {
                slug.push('-');
            }
            last_dash = true;
        } else {
            slug.push(c);
            last_dash = false;
        }
    }
    slug.trim_matches('-').chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (AdrManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let manager = AdrManager::new(dir.path().join("docs/adr")).unwrap();
        (manager, dir)
    }

    #[test]
    fn template_is_seeded_once() {
        let (_manager, dir) = manager();
        let template = dir.path().join("docs/adr/template.md");
        assert!(template.exists());
        let content = fs::read_to_string(&template).unwrap();
        assert!(content.contains("## ステータス"));
    }

    #[test]
    fn numbers_are_monotonic_from_highest_existing() {
        let (manager, dir) = manager();
        assert_eq!(manager.next_number(), 1);

        fs::write(dir.path().join("docs/adr/0007-existing.md"), "# ADR-0007: x").unwrap();
        assert_eq!(manager.next_number(), 8);

        let number = manager
            .create(&AdrDraft {
                title: "Use file locks".into(),
                ..AdrDraft::default()
            })
            .unwrap();
        assert_eq!(number, "0008");
        assert_eq!(manager.next_number(), 9);
    }

    #[test]
    fn create_and_reload() {
        let (manager, _dir) = manager();
        let number = manager
            .create(&AdrDraft {
                title: "Adopt Optimistic Concurrency".into(),
                context: "multiple writers on one index".into(),
                decision: "versioned mutate with retry".into(),
                related_intents: vec!["task_003".into()],
                ..AdrDraft::default()
            })
            .unwrap();

        let record = manager.get(&number).unwrap().unwrap();
        assert_eq!(record.title, "Adopt Optimistic Concurrency");
        assert_eq!(record.status, "Proposed");
        assert_eq!(record.related_intents, vec!["task_003"]);
        assert!(record.content.contains("versioned mutate with retry"));

        // Short numbers are zero-padded on lookup.
        assert!(manager.get("8").unwrap().is_none());
        assert!(manager.get("1").unwrap().is_some());
    }

    #[test]
    fn status_update_rewrites_in_place() {
        let (manager, _dir) = manager();
        let number = manager
            .create(&AdrDraft {
                title: "Pending decision".into(),
                ..AdrDraft::default()
            })
            .unwrap();

        assert!(manager.update_status(&number, "Accepted").unwrap());
        let record = manager.get(&number).unwrap().unwrap();
        assert_eq!(record.status, "Accepted");
        // The rest of the document is untouched.
        assert!(record.content.contains("## 関連Intent"));
        assert!(!manager.update_status("0099", "Accepted").unwrap());
    }

    #[test]
    fn related_intents_accumulate_without_duplicates() {
        let (manager, _dir) = manager();
        let number = manager
            .create(&AdrDraft {
                title: "Linked decision".into(),
                ..AdrDraft::default()
            })
            .unwrap();

        assert!(manager.add_related_intent(&number, "task_001").unwrap());
        assert!(manager.add_related_intent(&number, "task_002").unwrap());
        assert!(manager.add_related_intent(&number, "task_001").unwrap());

        let record = manager.get(&number).unwrap().unwrap();
        assert_eq!(record.related_intents, vec!["task_001", "task_002"]);
    }

    #[test]
    fn slugify_flattens_titles() {
        assert_eq!(slugify("Use File Locks!"), "use-file-locks");
        assert_eq!(slugify("  spaces   and---dashes "), "spaces-and-dashes");
        let long = "x".repeat(80);
        assert_eq!(slugify(&long).len(), 50);
    }

    #[test]
    fn all_lists_in_number_order() {
        let (manager, _dir) = manager();
        manager
            .create(&AdrDraft {
                title: "first".into(),
                ..AdrDraft::default()
            })
            .unwrap();
        manager
            .create(&AdrDraft {
                title: "second".into(),
                ..AdrDraft::default()
            })
            .unwrap();
        let records = manager.all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].number, "0001");
        assert_eq!(records[1].number, "0002");
    }
}
