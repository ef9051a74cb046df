//! Dashboard rendering: header, completion gauge, task table, log tail.

use super::DashboardData;
use crate::models::TaskStatus;
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table};

pub fn render(frame: &mut Frame, data: &DashboardData) {
    let areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(14),
        ])
        .split(frame.area());

    render_header(frame, areas[0], data);
    render_gauge(frame, areas[1], data);
    render_tasks(frame, areas[2], data);
    render_logs(frame, areas[3], data);
}

fn render_header(frame: &mut Frame, area: Rect, data: &DashboardData) {
    let status = &data.status;
    let continuing = status.should_continue();
    let line = Line::from(vec![
        Span::styled(
            " maestro ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            "iteration {}  ",
            status.current_iteration.unwrap_or(0)
        )),
        Span::styled(
            if continuing { "running" } else { "stopped" },
            Style::default().fg(if continuing { Color::Green } else { Color::Red }),
        ),
        Span::raw(format!(
            "  updated {}",
            status.last_updated.as_deref().unwrap_or("-")
        )),
        Span::styled("   q to quit", Style::default().fg(Color::DarkGray)),
    ]);
    frame.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn render_gauge(frame: &mut Frame, area: Rect, data: &DashboardData) {
    let ratio = if data.stats.total > 0 {
        data.stats.completed as f64 / data.stats.total as f64
    } else {
        0.0
    };
    let label = format!(
        "{}/{} tasks completed, {} failed",
        data.stats.completed, data.stats.total, data.stats.failed
    );
    frame.render_widget(
        Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("progress"))
            .gauge_style(Style::default().fg(Color::Green))
            .ratio(ratio.clamp(0.0, 1.0))
            .label(label),
        area,
    );
}

fn status_style(status: TaskStatus) -> Style {
    let color = match status {
        TaskStatus::Pending => Color::Gray,
        TaskStatus::InProgress => Color::Yellow,
        TaskStatus::Completed => Color::Green,
        TaskStatus::Failed => Color::Red,
    };
    Style::default().fg(color)
}

fn render_tasks(frame: &mut Frame, area: Rect, data: &DashboardData) {
    let rows: Vec<Row> = data
        .tasks
        .iter()
        .rev()
        .map(|task| {
            Row::new(vec![
                Cell::from(task.id.clone()),
                Cell::from(task.title.clone()),
                Cell::from(task.status.as_str()).style(status_style(task.status)),
                Cell::from(task.priority.as_str()),
                Cell::from(task.assigned_to.clone().unwrap_or_default()),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(10),
            Constraint::Min(24),
            Constraint::Length(12),
            Constraint::Length(8),
            Constraint::Length(10),
        ],
    )
    .header(
        Row::new(vec!["id", "title", "status", "priority", "worker"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(Block::default().borders(Borders::ALL).title("tasks"));
    frame.render_widget(table, area);
}

fn render_logs(frame: &mut Frame, area: Rect, data: &DashboardData) {
    let lines: Vec<Line> = data
        .log_lines
        .iter()
        .map(|l| Line::from(l.as_str()))
        .collect();
    frame.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("log")),
        area,
    );
}
