//! Wire documents exchanged with the remote table service.

use std::collections::BTreeSet;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::dao::models::{ParticipantEntity, ParticipantUpdate, TableEntity, TablePatch};

use super::error::HttpStoreError;

/// Wire representation of table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDocument {
    pub table_id: String,
    pub display_name: String,
    pub created_at: String,
    pub is_archived: bool,
    pub user_count: u64,
}

impl TableDocument {
    /// Convert into the shared entity, parsing the creation timestamp.
    pub fn try_into_entity(self, path: &str) -> Result<TableEntity, HttpStoreError> {
        let created_at = parse_timestamp(&self.created_at, path)?;
        Ok(TableEntity {
            table_id: self.table_id,
            display_name: self.display_name,
            created_at,
            is_archived: self.is_archived,
            user_count: self.user_count,
        })
    }
}

/// One page of table metadata.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePageDocument {
    pub tables: Vec<TableDocument>,
    #[serde(default)]
    pub last_key: Option<String>,
}

/// Wire representation of a participant row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDocument {
    pub username: String,
    pub table_id: String,
    pub composite_score: f64,
    #[serde(default)]
    pub team_name: Option<String>,
    #[serde(default)]
    pub completed_task_ids: Vec<String>,
    pub tasks_completed: u32,
    pub total_tasks: u32,
    pub primary_metric: f64,
    pub last_updated: String,
}

impl ParticipantDocument {
    /// Convert into the shared entity, de-duplicating the task set and
    /// parsing the update timestamp.
    pub fn try_into_entity(self, path: &str) -> Result<ParticipantEntity, HttpStoreError> {
        let last_updated = parse_timestamp(&self.last_updated, path)?;
        let completed_task_ids: BTreeSet<String> = self.completed_task_ids.into_iter().collect();
        Ok(ParticipantEntity {
            username: self.username,
            table_id: self.table_id,
            composite_score: self.composite_score,
            team_name: self.team_name,
            completed_task_ids,
            tasks_completed: self.tasks_completed,
            total_tasks: self.total_tasks,
            primary_metric: self.primary_metric,
            last_updated,
        })
    }
}

/// One page of participant rows.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPageDocument {
    pub users: Vec<ParticipantDocument>,
    #[serde(default)]
    pub last_key: Option<String>,
}

/// Body of a table creation request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTableBody {
    pub table_id: String,
    pub display_name: String,
}

/// Body of a table metadata patch; absent fields are left untouched.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePatchBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,
}

impl From<TablePatch> for TablePatchBody {
    fn from(patch: TablePatch) -> Self {
        Self {
            display_name: patch.display_name,
            is_archived: patch.is_archived,
        }
    }
}

/// Body of a participant upsert.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PutUserBody {
    pub composite_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    pub completed_task_ids: Vec<String>,
    pub tasks_completed: u32,
    pub total_tasks: u32,
    pub primary_metric: f64,
}

impl From<ParticipantUpdate> for PutUserBody {
    fn from(update: ParticipantUpdate) -> Self {
        Self {
            composite_score: update.composite_score,
            team_name: update.team_name,
            completed_task_ids: update.completed_task_ids.into_iter().collect(),
            tasks_completed: update.tasks_completed,
            total_tasks: update.total_tasks,
            primary_metric: update.primary_metric,
        }
    }
}

fn parse_timestamp(value: &str, path: &str) -> Result<SystemTime, HttpStoreError> {
    OffsetDateTime::parse(value, &Rfc3339)
        .map(SystemTime::from)
        .map_err(|source| HttpStoreError::InvalidTimestamp {
            path: path.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_document_round_trips_and_dedups_tasks() {
        let raw = serde_json::json!({
            "username": "alice",
            "tableId": "demo-scores",
            "compositeScore": 0.2,
            "teamName": "Red",
            "completedTaskIds": ["t1", "t2", "t1"],
            "tasksCompleted": 2,
            "totalTasks": 20,
            "primaryMetric": 0.8,
            "lastUpdated": "2024-06-01T12:00:00Z"
        });

        let document: ParticipantDocument = serde_json::from_value(raw).unwrap();
        let entity = document.try_into_entity("/test").unwrap();
        assert_eq!(entity.username, "alice");
        assert_eq!(entity.completed_task_ids.len(), 2);
        assert_eq!(entity.team_name.as_deref(), Some("Red"));
    }

    #[test]
    fn missing_team_defaults_to_unassigned() {
        let raw = serde_json::json!({
            "username": "bob",
            "tableId": "demo-scores",
            "compositeScore": 0.3,
            "tasksCompleted": 6,
            "totalTasks": 20,
            "primaryMetric": 1.0,
            "lastUpdated": "2024-06-01T12:00:00Z"
        });

        let document: ParticipantDocument = serde_json::from_value(raw).unwrap();
        let entity = document.try_into_entity("/test").unwrap();
        assert!(entity.team_name.is_none());
        assert!(entity.completed_task_ids.is_empty());
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let raw = serde_json::json!({
            "tableId": "demo-scores",
            "displayName": "Demo",
            "createdAt": "yesterday",
            "isArchived": false,
            "userCount": 0
        });

        let document: TableDocument = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            document.try_into_entity("/test"),
            Err(HttpStoreError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn patch_body_omits_absent_fields() {
        let body = TablePatchBody::from(TablePatch {
            display_name: None,
            is_archived: Some(true),
        });
        let value = serde_json::to_value(body).unwrap();
        assert_eq!(value, serde_json::json!({ "isArchived": true }));
    }
}
