//! Read-only terminal dashboard: polls the state directory and log files
//! and renders loop status, task counts, the task table, and recent log
//! lines. It never writes state.

mod views;

use crate::config::Config;
use crate::models::{StatusFile, Task, TaskStatistics};
use crate::state::StateStore;
use crate::util::today_stamp;
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// How often state files are re-read.
const DATA_REFRESH_INTERVAL: Duration = Duration::from_secs(1);
/// Event poll timeout, which also paces redraws.
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Log lines kept in the tail panel.
const LOG_TAIL_LINES: usize = 12;

/// Snapshot of everything the dashboard renders.
#[derive(Debug, Default)]
pub struct DashboardData {
    pub status: StatusFile,
    pub stats: TaskStatistics,
    pub tasks: Vec<Task>,
    pub log_lines: Vec<String>,
}

impl DashboardData {
    pub fn load(store: &StateStore, log_dir: &Path) -> Self {
        let status = store.status().unwrap_or_default();
        let tasks = store.all_tasks().unwrap_or_default();
        let stats = TaskStatistics::from_tasks(&tasks);
        let log_lines = tail_log(&log_dir.join(format!("execution_{}.log", today_stamp())));
        Self {
            status,
            stats,
            tasks,
            log_lines,
        }
    }
}

fn tail_log(path: &PathBuf) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    lines
        .iter()
        .rev()
        .take(LOG_TAIL_LINES)
        .rev()
        .map(|s| s.to_string())
        .collect()
}

/// Run the dashboard until `q`, `Esc`, or Ctrl-C.
pub fn run(config: &Config) -> Result<()> {
    let store = StateStore::new(config.state_dir.clone(), config.backup_dir())
        .context("Failed to open state directory")?;

    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, EnterAlternateScreen).context("Failed to enter alt screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("Failed to initialize terminal")?;

    let result = event_loop(&mut terminal, &store, &config.log_dir);

    disable_raw_mode().ok();
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    store: &StateStore,
    log_dir: &Path,
) -> Result<()> {
    let mut data = DashboardData::load(store, log_dir);
    let mut last_refresh = Instant::now();

    loop {
        terminal.draw(|frame| views::render(frame, &data))?;

        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                let quit = matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                    || (key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL));
                if quit {
                    return Ok(());
                }
            }
        }

        if last_refresh.elapsed() >= DATA_REFRESH_INTERVAL {
            data = DashboardData::load(store, log_dir);
            last_refresh = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, TaskResult};
    use tempfile::TempDir;

    #[test]
    fn data_load_reflects_state() {
        let dir = TempDir::new().unwrap();
        let store =
            StateStore::new(dir.path().join("state"), dir.path().join("state/backups")).unwrap();
        let id = store
            .add_task(&NewTask {
                title: "visible task".into(),
                ..NewTask::default()
            })
            .unwrap();
        store.assign_task(&id, "w").unwrap();
        store.complete_task(&id, &TaskResult::new("done")).unwrap();
        store
            .update_status(|s| {
                s.current_iteration = Some(3);
                s.progress_score = Some(0.7);
            })
            .unwrap();

        let log_dir = dir.path().join("logs");
        std::fs::create_dir_all(&log_dir).unwrap();
        std::fs::write(
            log_dir.join(format!("execution_{}.log", today_stamp())),
            "line one\nline two\n",
        )
        .unwrap();

        let data = DashboardData::load(&store, &log_dir);
        assert_eq!(data.stats.total, 1);
        assert_eq!(data.stats.completed, 1);
        assert_eq!(data.status.current_iteration, Some(3));
        assert_eq!(data.tasks[0].title, "visible task");
        assert_eq!(data.log_lines, vec!["line one", "line two"]);
    }

    #[test]
    fn data_load_tolerates_empty_state() {
        let dir = TempDir::new().unwrap();
        let store =
            StateStore::new(dir.path().join("state"), dir.path().join("state/backups")).unwrap();
        let data = DashboardData::load(&store, &dir.path().join("missing-logs"));
        assert_eq!(data.stats.total, 0);
        assert!(data.log_lines.is_empty());
    }
}
