//! Shared utility functions for the maestro crate.

use chrono::{Local, SecondsFormat};
use regex::Regex;
use std::sync::LazyLock;

static JSON_FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*\n(.*?)\n```").unwrap());

/// Current local time as an ISO-8601 string. Every durable timestamp in
/// the state store goes through this so sorts stay lexicographic.
pub fn now_iso() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current local time formatted for checkpoint/backup/log file names.
pub fn now_compact() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Today's date stamp used in daily log file names.
pub fn today_stamp() -> String {
    Local::now().format("%Y%m%d").to_string()
}

/// Extract the contents of the first ```json fenced block, if any.
pub fn extract_json_fence(text: &str) -> Option<String> {
    JSON_FENCE_REGEX
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extract a JSON object from text that may contain other content.
/// Uses brace-counting to find the outermost JSON object.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0;
    let mut end = start;

    for (i, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if depth == 0 && end > start {
        Some(text[start..end].to_string())
    } else {
        None
    }
}

/// Truncate a string to at most `max_chars` characters, respecting
/// character boundaries.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
