//! Ranking computations over leaderboard snapshots.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::SystemTime;

use indexmap::IndexMap;

use crate::dao::models::ParticipantEntity;
use crate::services::leaderboard_cache::LeaderboardSnapshot;

/// Optimistic replacement for one participant's row during ranking.
///
/// Lets a caller see a just-submitted, not-yet-confirmed value reflected in
/// the ranking before the store's read path is guaranteed consistent.
#[derive(Debug, Clone)]
pub struct ScoreOverride {
    /// Participant whose row is replaced (or synthesised when absent).
    pub username: String,
    /// Score to rank with.
    pub composite_score: f64,
    /// Team carried by the override.
    pub team_name: Option<String>,
    /// Completed tasks carried by the override.
    pub completed_task_ids: BTreeSet<String>,
    /// Task counter carried by the override.
    pub tasks_completed: u32,
    /// Course size carried by the override.
    pub total_tasks: u32,
    /// Metric value carried by the override.
    pub primary_metric: f64,
}

/// Aggregated standing for one team.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamStanding {
    /// Team name as stored on member rows.
    pub team_name: String,
    /// Arithmetic mean of member scores.
    pub mean_score: f64,
    /// Number of members contributing to the mean.
    pub member_count: usize,
}

/// Result of a rank computation for one caller.
#[derive(Debug, Clone)]
pub struct RankView {
    /// The caller this view was computed for.
    pub username: String,
    /// The caller's score; `None` when the caller is absent from the
    /// snapshot and no override was supplied ("not yet ranked").
    pub composite_score: Option<f64>,
    /// 1-based position in the individual ranking, when present.
    pub individual_rank: Option<usize>,
    /// 1-based position of the caller's team, when the caller has one.
    pub team_rank: Option<usize>,
    /// All participants, sorted by score descending (stable on ties).
    pub sorted_users: Vec<ParticipantEntity>,
    /// All teams, sorted by mean score descending (stable on ties).
    pub sorted_teams: Vec<TeamStanding>,
    /// The caller's completed tasks, override-sourced when present.
    pub completed_task_ids: BTreeSet<String>,
    /// True when the snapshot was served past its TTL because the store was
    /// unreachable.
    pub stale: bool,
}

/// Compute the caller's individual and team ranks from a snapshot.
///
/// The snapshot itself is never mutated; the optional override is applied
/// to an in-memory copy, inserting a synthetic row when the caller has no
/// stored row yet (e.g. a first-ever score).
pub fn rank_view(
    snapshot: &LeaderboardSnapshot,
    username: &str,
    override_row: Option<&ScoreOverride>,
) -> RankView {
    let mut users: Vec<ParticipantEntity> = snapshot.participants.clone();

    if let Some(row) = override_row {
        match users.iter_mut().find(|user| user.username == row.username) {
            Some(existing) => apply_override(existing, row),
            None => users.push(synthetic_row(&snapshot.table_id, row)),
        }
    }

    // Stable sort: equal scores keep their store iteration order rather
    // than inventing a tie-break field.
    users.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(Ordering::Equal)
    });

    let individual_rank = users
        .iter()
        .position(|user| user.username == username)
        .map(|index| index + 1);

    let caller = individual_rank.map(|rank| &users[rank - 1]);
    let composite_score = caller.map(|user| user.composite_score);
    let caller_team = caller.and_then(|user| user.team_name.clone());
    let completed_task_ids = match override_row {
        Some(row) => row.completed_task_ids.clone(),
        None => caller
            .map(|user| user.completed_task_ids.clone())
            .unwrap_or_default(),
    };

    let sorted_teams = team_standings(&users);
    let team_rank = caller_team.as_deref().and_then(|team| {
        sorted_teams
            .iter()
            .position(|standing| standing.team_name == team)
            .map(|index| index + 1)
    });

    RankView {
        username: username.to_string(),
        composite_score,
        individual_rank,
        team_rank,
        sorted_users: users,
        sorted_teams,
        completed_task_ids,
        stale: snapshot.stale,
    }
}

/// Group users by team and rank teams by mean member score.
///
/// Rows without a team are excluded entirely; grouping preserves first-seen
/// order so equal means rank stably.
fn team_standings(users: &[ParticipantEntity]) -> Vec<TeamStanding> {
    let mut groups: IndexMap<&str, (f64, usize)> = IndexMap::new();
    for user in users {
        let Some(team) = user.team_name.as_deref() else {
            continue;
        };
        if team.is_empty() {
            continue;
        }
        let entry = groups.entry(team).or_insert((0.0, 0));
        entry.0 += user.composite_score;
        entry.1 += 1;
    }

    let mut standings: Vec<TeamStanding> = groups
        .into_iter()
        .map(|(team_name, (total, member_count))| TeamStanding {
            team_name: team_name.to_string(),
            mean_score: total / member_count as f64,
            member_count,
        })
        .collect();

    standings.sort_by(|a, b| {
        b.mean_score
            .partial_cmp(&a.mean_score)
            .unwrap_or(Ordering::Equal)
    });

    standings
}

fn apply_override(user: &mut ParticipantEntity, row: &ScoreOverride) {
    user.composite_score = row.composite_score;
    user.team_name = row.team_name.clone();
    user.completed_task_ids = row.completed_task_ids.clone();
    user.tasks_completed = row.tasks_completed;
    user.total_tasks = row.total_tasks;
    user.primary_metric = row.primary_metric;
}

fn synthetic_row(table_id: &str, row: &ScoreOverride) -> ParticipantEntity {
    ParticipantEntity {
        username: row.username.clone(),
        table_id: table_id.to_string(),
        composite_score: row.composite_score,
        team_name: row.team_name.clone(),
        completed_task_ids: row.completed_task_ids.clone(),
        tasks_completed: row.tasks_completed,
        total_tasks: row.total_tasks,
        primary_metric: row.primary_metric,
        last_updated: SystemTime::now(),
    }
}
