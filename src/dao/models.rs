use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::SystemTime;

/// Metadata describing one logical leaderboard table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableEntity {
    /// Stable identifier, unique and immutable once created.
    pub table_id: String,
    /// Human readable table name.
    pub display_name: String,
    /// Creation timestamp for auditing/debugging.
    pub created_at: SystemTime,
    /// Whether the table has been archived by an operator.
    pub is_archived: bool,
    /// Number of distinct participant rows ever inserted. Never decremented
    /// because participant removal is not supported.
    pub user_count: u64,
}

/// One participant row within a table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantEntity {
    /// Verified identity supplied by the external session collaborator.
    pub username: String,
    /// Identifier of the owning table.
    pub table_id: String,
    /// Last composite score accepted by the store.
    pub composite_score: f64,
    /// Team assignment; `None` means unassigned and excluded from team
    /// ranking.
    pub team_name: Option<String>,
    /// De-duplicated set of completed task identifiers. Only grows within a
    /// single engine session.
    pub completed_task_ids: BTreeSet<String>,
    /// Number of completed tasks; equals the size of the task set.
    pub tasks_completed: u32,
    /// Total tasks configured for the course.
    pub total_tasks: u32,
    /// Primary accuracy-like metric in `[0, 1]`.
    pub primary_metric: f64,
    /// Last time this row was written.
    pub last_updated: SystemTime,
}

/// Fields written by a participant upsert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantUpdate {
    /// Composite score computed from the update's metric and progress.
    pub composite_score: f64,
    /// Team assignment carried with the write.
    pub team_name: Option<String>,
    /// Completed task identifiers at the time of the update.
    pub completed_task_ids: BTreeSet<String>,
    /// Number of completed tasks.
    pub tasks_completed: u32,
    /// Total tasks configured for the course.
    pub total_tasks: u32,
    /// Primary metric value used for the score.
    pub primary_metric: f64,
}

/// Partial update for table metadata; only supplied fields are transmitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TablePatch {
    /// New display name, when present.
    pub display_name: Option<String>,
    /// New archive flag, when present.
    pub is_archived: Option<bool>,
}

/// One page of a listing plus the continuation token for the next page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Items contained in this page, in store iteration order.
    pub items: Vec<T>,
    /// Opaque token to request the next page; `None` when exhausted.
    pub next_token: Option<String>,
}

/// Cursor and size for a single page request.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    /// Continuation token from the previous page, if any.
    pub token: Option<String>,
    /// Maximum number of items to return; backend default when `None`.
    pub limit: Option<usize>,
}
