//! Logging plumbing: a size-rotated execution log behind `tracing`, and
//! daily JSONL sinks for agent runs, errors, and progress summaries.
//!
//! JSONL appends are single lines with one producer per record source,
//! so concurrent workers can share the files safely.

use crate::errors::OrchestratorError;
use crate::models::TaskStatistics;
use crate::util::{now_iso, today_stamp};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
const LOG_BACKUPS: u32 = 5;

/// Install the global tracing subscriber: styled console output plus the
/// rotating `execution_YYYYMMDD.log`. The returned guard must be held for
/// the life of the process so buffered log lines flush on exit.
pub fn init(log_dir: &Path, log_level: &str, fsync: bool) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    let log_path = log_dir.join(format!("execution_{}.log", today_stamp()));
    let writer = RotatingWriter::open(log_path, MAX_LOG_BYTES, LOG_BACKUPS, fsync)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);

    let filter = EnvFilter::try_new(log_level.to_lowercase())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
        .try_init()
        .ok();
    Ok(guard)
}

/// Append-only writer that rotates at `max_bytes`, keeping
/// `path.1 … path.N` backups, newest first.
pub struct RotatingWriter {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    backups: u32,
    fsync: bool,
}

impl RotatingWriter {
    pub fn open(path: PathBuf, max_bytes: u64, backups: u32, fsync: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            file,
            written,
            max_bytes,
            backups,
            fsync,
        })
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        let backup = |n: u32| PathBuf::from(format!("{}.{n}", self.path.display()));
        let oldest = backup(self.backups);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.backups).rev() {
            let from = backup(n);
            if from.exists() {
                fs::rename(&from, backup(n + 1))?;
            }
        }
        if self.path.exists() {
            fs::rename(&self.path, backup(1))?;
        }
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        if self.fsync {
            self.file.sync_data()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

/// Structured JSONL sinks, one file per day per record type.
pub struct RunLogger {
    log_dir: PathBuf,
}

impl RunLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Result<Self> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir).context("Failed to create log directory")?;
        Ok(Self { log_dir })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// One record per role invocation.
    #[allow(clippy::too_many_arguments)]
    pub fn log_agent_run(
        &self,
        agent: &str,
        iteration: u32,
        prompt_length: usize,
        response_length: usize,
        duration_seconds: f64,
        mode: &str,
        model: Option<&str>,
    ) {
        self.append(
            "execution",
            json!({
                "timestamp": now_iso(),
                "agent": agent,
                "iteration": iteration,
                "prompt_length": prompt_length,
                "response_length": response_length,
                "duration_seconds": (duration_seconds * 1000.0).round() / 1000.0,
                "mode": mode,
                "model": model.unwrap_or("default"),
            }),
        );
    }

    /// One record per surfaced error, with the full cause chain.
    pub fn log_error(&self, agent: &str, error: &OrchestratorError, context: Value) {
        self.append(
            "errors",
            json!({
                "timestamp": now_iso(),
                "agent": agent,
                "error_kind": error.kind(),
                "error_message": error.to_string(),
                "cause_chain": cause_chain(error),
                "context": context,
            }),
        );
    }

    /// One record per iteration progress summary.
    pub fn log_progress(&self, iteration: u32, stats: &TaskStatistics) {
        let completion_rate = if stats.total > 0 {
            (stats.completed as f64 / stats.total as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };
        self.append(
            "progress",
            json!({
                "timestamp": now_iso(),
                "iteration": iteration,
                "total_tasks": stats.total,
                "completed_tasks": stats.completed,
                "failed_tasks": stats.failed,
                "pending_tasks": stats.pending,
                "completion_rate": completion_rate,
            }),
        );
    }

    fn append(&self, kind: &str, record: Value) {
        let path = self
            .log_dir
            .join(format!("{kind}_{}.jsonl", today_stamp()));
        let line = record.to_string();
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to append log record");
        }
    }
}

fn cause_chain(error: &OrchestratorError) -> Vec<String> {
    let mut chain = Vec::new();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    chain
}
