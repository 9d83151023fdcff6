//! Per-participant local progress tracked between store synchronisations.

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::{dao::models::ParticipantUpdate, error::EngineError, score};

/// Metric name preferred as primary when none was designated explicitly.
const DEFAULT_PRIMARY_METRIC: &str = "accuracy";

/// Local accumulating state for one participant.
///
/// Mirrors what the store will eventually hold for the row: named metrics
/// with one designated primary, and a completed-task set that only grows.
#[derive(Debug, Clone)]
pub struct ProgressState {
    metrics: IndexMap<String, f64>,
    primary_metric: Option<String>,
    completed_tasks: BTreeSet<String>,
    total_tasks: u32,
    team_name: Option<String>,
}

impl ProgressState {
    /// Fresh state for a participant in a course of `total_tasks` tasks.
    pub fn new(total_tasks: u32) -> Self {
        Self {
            metrics: IndexMap::new(),
            primary_metric: None,
            completed_tasks: BTreeSet::new(),
            total_tasks,
            team_name: None,
        }
    }

    /// Record a metric observation.
    ///
    /// The first metric ever recorded becomes primary automatically unless a
    /// later call designates another one explicitly.
    pub fn set_metric(&mut self, name: &str, value: f64, primary: bool) {
        self.metrics.insert(name.to_string(), value);

        if primary || (self.primary_metric.is_none() && self.metrics.len() == 1) {
            self.primary_metric = Some(name.to_string());
        }
    }

    /// Mark `task_id` as completed; returns `true` when it was new.
    ///
    /// Tasks are never un-completed, so repeat completions are no-ops.
    pub fn complete_task(&mut self, task_id: &str) -> bool {
        self.completed_tasks.insert(task_id.to_string())
    }

    /// Assign (or clear) the participant's team.
    pub fn assign_team(&mut self, team_name: Option<String>) {
        self.team_name = team_name;
    }

    /// Current team assignment.
    pub fn team_name(&self) -> Option<&str> {
        self.team_name.as_deref()
    }

    /// Number of distinct tasks completed so far.
    pub fn tasks_completed(&self) -> u32 {
        self.completed_tasks.len() as u32
    }

    /// The completed-task set.
    pub fn completed_tasks(&self) -> &BTreeSet<String> {
        &self.completed_tasks
    }

    /// Value of the primary metric, falling back to `accuracy` and then the
    /// first recorded metric when no primary was designated.
    pub fn primary_value(&self) -> f64 {
        let name = self
            .primary_metric
            .as_deref()
            .or_else(|| {
                self.metrics
                    .contains_key(DEFAULT_PRIMARY_METRIC)
                    .then_some(DEFAULT_PRIMARY_METRIC)
            })
            .or_else(|| self.metrics.keys().next().map(String::as_str));

        name.and_then(|name| self.metrics.get(name).copied())
            .unwrap_or(0.0)
    }

    /// Composite score preview computed locally, without any store traffic.
    pub fn local_score(&self) -> Result<f64, EngineError> {
        score::composite_score(self.primary_value(), self.tasks_completed(), self.total_tasks)
    }

    /// Build the upsert payload reflecting the current local state.
    pub fn to_update(&self) -> Result<ParticipantUpdate, EngineError> {
        Ok(ParticipantUpdate {
            composite_score: self.local_score()?,
            team_name: self.team_name.clone(),
            completed_task_ids: self.completed_tasks.clone(),
            tasks_completed: self.tasks_completed(),
            total_tasks: self.total_tasks,
            primary_metric: self.primary_value(),
        })
    }
}
