//! Commit lookup against the target repository, used to enrich parsed
//! commit references with the full hash, message, and author time.

use crate::models::CommitRef;
use anyhow::Result;
use chrono::{Local, TimeZone};
use git2::Repository;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

pub struct CommitLookup {
    // Repository handles are Send but not Sync; the lookup is shared
    // across worker tasks, so access is serialized here.
    repo: Option<Mutex<Repository>>,
}

impl CommitLookup {
    /// Open the repository at `path`. A non-repository target is not an
    /// error — lookups just return nothing.
    pub fn open(path: &Path) -> Self {
        let repo = Repository::discover(path).ok();
        if repo.is_none() {
            debug!(path = %path.display(), "target is not a git repository");
        }
        Self {
            repo: repo.map(Mutex::new),
        }
    }

    pub fn is_repo(&self) -> bool {
        self.repo.is_some()
    }

    /// Resolve a (possibly short) commit hash to a full reference.
    pub fn resolve(&self, hash: &str) -> Option<CommitRef> {
        let repo = self.repo.as_ref()?.lock().ok()?;
        let object = repo.revparse_single(hash).ok()?;
        let commit = object.peel_to_commit().ok()?;

        let timestamp = Local
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .map(|t| t.to_rfc3339());
        Some(CommitRef {
            hash: commit.id().to_string(),
            message: commit.summary().map(str::to_string),
            timestamp,
        })
    }

    /// Enrich a parsed commit: full hash, and message/timestamp filled in
    /// from the repository when the parse left them empty.
    pub fn enrich(&self, parsed: CommitRef) -> CommitRef {
        match self.resolve(&parsed.hash) {
            Some(resolved) => CommitRef {
                hash: resolved.hash,
                message: parsed.message.or(resolved.message),
                timestamp: parsed.timestamp.or(resolved.timestamp),
            },
            None => parsed,
        }
    }
}

/// Files changed in a commit relative to its first parent.
pub fn commit_files(repo_path: &Path, hash: &str) -> Result<Vec<String>> {
    let repo = Repository::discover(repo_path)?;
    let commit = repo.revparse_single(hash)?.peel_to_commit()?;
    let tree = commit.tree()?;
    let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());

    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
    let mut files = Vec::new();
    diff.foreach(
        &mut |delta, _| {
            if let Some(path) = delta.new_file().path() {
                files.push(path.to_string_lossy().into_owned());
            }
            true
        },
        None,
        None,
        None,
    )?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use tempfile::TempDir;

    fn seed_repo(dir: &TempDir) -> String {
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("hello.txt")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("tester", "tester@localhost").unwrap();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, "initial commit", &tree, &[])
            .unwrap();
        oid.to_string()
    }

    #[test]
    fn resolves_short_hashes() {
        let dir = TempDir::new().unwrap();
        let full = seed_repo(&dir);
        let lookup = CommitLookup::open(dir.path());
        assert!(lookup.is_repo());

        let resolved = lookup.resolve(&full[..8]).unwrap();
        assert_eq!(resolved.hash, full);
        assert_eq!(resolved.message.as_deref(), Some("initial commit"));
        assert!(resolved.timestamp.is_some());
    }

    #[test]
    fn non_repo_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let lookup = CommitLookup::open(dir.path());
        assert!(!lookup.is_repo());
        assert!(lookup.resolve("abc123").is_none());

        // Enrich passes the parsed reference through untouched.
        let parsed = CommitRef {
            hash: "abc123".into(),
            message: Some("msg".into()),
            timestamp: None,
        };
        assert_eq!(lookup.enrich(parsed.clone()), parsed);
    }

    #[test]
    fn enrich_prefers_parsed_message() {
        let dir = TempDir::new().unwrap();
        let full = seed_repo(&dir);
        let lookup = CommitLookup::open(dir.path());

        let enriched = lookup.enrich(CommitRef {
            hash: full[..8].to_string(),
            message: Some("parsed message".into()),
            timestamp: None,
        });
        assert_eq!(enriched.hash, full);
        assert_eq!(enriched.message.as_deref(), Some("parsed message"));
        assert!(enriched.timestamp.is_some());
    }

    #[test]
    fn commit_files_lists_the_change() {
        let dir = TempDir::new().unwrap();
        let full = seed_repo(&dir);
        let files = commit_files(dir.path(), &full).unwrap();
        assert_eq!(files, vec!["hello.txt"]);
    }
}
