//! Worker model selection by task complexity.
//!
//! Score = description length / 1000 + file count × 2 + estimated hours
//! × 5 + priority score. Below the light threshold a cheap model runs the
//! task; above the powerful threshold an expensive one does.

use crate::config::ModelSelectionConfig;
use crate::models::task::Task;

/// Complexity band a task falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexityBand {
    Default,
    Light,
    Standard,
    Powerful,
}

impl ComplexityBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Light => "light",
            Self::Standard => "standard",
            Self::Powerful => "powerful",
        }
    }
}

/// Selects the worker model for a task based on its complexity score.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    config: ModelSelectionConfig,
    default_model: Option<String>,
}

impl ModelSelector {
    pub fn new(config: ModelSelectionConfig, default_model: Option<String>) -> Self {
        Self {
            config,
            default_model,
        }
    }

    pub fn complexity_score(task: &Task) -> f64 {
        let description_score = task.description.len() as f64 / 1000.0;
        let file_score = task.files.len() as f64 * 2.0;
        let hours_score = task.estimated_hours * 5.0;
        let priority_score = f64::from(task.priority.score());
        description_score + file_score + hours_score + priority_score
    }

    pub fn band(&self, task: &Task) -> ComplexityBand {
        if !self.config.enabled {
            return ComplexityBand::Default;
        }
        let score = Self::complexity_score(task);
        if score < self.config.threshold_light {
            ComplexityBand::Light
        } else if score >= self.config.threshold_powerful {
            ComplexityBand::Powerful
        } else {
            ComplexityBand::Standard
        }
    }

    /// Model to run this task with, or `None` for the backend default.
    pub fn select(&self, task: &Task) -> Option<String> {
        if !self.config.enabled {
            return self.default_model.clone();
        }
        let banded = match self.band(task) {
            ComplexityBand::Light => self.config.model_light.clone(),
            ComplexityBand::Powerful => self.config.model_powerful.clone(),
            _ => self.config.model_standard.clone(),
        };
        banded.or_else(|| self.default_model.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::{Task, TaskIndexEntry, TaskPriority};

    fn task_with(description: &str, files: usize, hours: f64, priority: TaskPriority) -> Task {
        let entry = TaskIndexEntry {
            id: "task_001".into(),
            title: "t".into(),
            priority,
            created_at: None,
        };
        let mut task = Task::from_index_entry(&entry);
        task.description = description.to_string();
        task.files = (0..files).map(|i| format!("src/f{i}.rs")).collect();
        task.estimated_hours = hours;
        task.priority = priority;
        task
    }

    fn selector(enabled: bool) -> ModelSelector {
        ModelSelector::new(
            ModelSelectionConfig {
                enabled,
                model_light: Some("light".into()),
                model_standard: Some("standard".into()),
                model_powerful: Some("powerful".into()),
                threshold_light: 10.0,
                threshold_powerful: 30.0,
            },
            Some("fallback".into()),
        )
    }

    #[test]
    fn score_formula() {
        let task = task_with(&"x".repeat(2000), 3, 1.0, TaskPriority::High);
        // 2.0 + 6.0 + 5.0 + 3.0
        assert_eq!(ModelSelector::complexity_score(&task), 16.0);
    }

    #[test]
    fn disabled_selection_uses_default() {
        let selector = selector(false);
        let task = task_with("", 0, 0.0, TaskPriority::Medium);
        assert_eq!(selector.band(&task), ComplexityBand::Default);
        assert_eq!(selector.select(&task), Some("fallback".into()));
    }

    #[test]
    fn bands_respect_thresholds() {
        let selector = selector(true);

        let light = task_with("small fix", 0, 0.0, TaskPriority::Low);
        assert_eq!(selector.band(&light), ComplexityBand::Light);
        assert_eq!(selector.select(&light), Some("light".into()));

        let standard = task_with("", 4, 1.0, TaskPriority::High);
        // 0 + 8 + 5 + 3 = 16
        assert_eq!(selector.band(&standard), ComplexityBand::Standard);
        assert_eq!(selector.select(&standard), Some("standard".into()));

        let heavy = task_with("", 10, 2.0, TaskPriority::High);
        // 0 + 20 + 10 + 3 = 33
        assert_eq!(selector.band(&heavy), ComplexityBand::Powerful);
        assert_eq!(selector.select(&heavy), Some("powerful".into()));
    }

    #[test]
    fn missing_band_model_falls_back() {
        let selector = ModelSelector::new(
            ModelSelectionConfig {
                enabled: true,
                model_light: None,
                model_standard: None,
                model_powerful: None,
                threshold_light: 10.0,
                threshold_powerful: 30.0,
            },
            Some("fallback".into()),
        );
        let task = task_with("tiny", 0, 0.0, TaskPriority::Low);
        assert_eq!(selector.select(&task), Some("fallback".into()));
    }
}
