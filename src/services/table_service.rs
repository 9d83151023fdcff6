//! Table bootstrap and metadata management flows.

use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, info};

use crate::{
    dao::{
        models::{TableEntity, TablePatch},
        progress_store::ProgressStore,
        storage::StoreError,
    },
    error::EngineError,
};

/// Suffix appended to every derived table identifier.
const TABLE_ID_SUFFIX: &str = "-scores";
/// Identifier stem used when nothing can be derived from the URL.
const TABLE_ID_FALLBACK: &str = "main";

/// Fetch a table, creating it when absent.
///
/// `AlreadyExists` on the create path means another caller won the race
/// between the miss and the create; the table is fetched again and returned
/// as success.
pub async fn ensure_table(
    store: &Arc<dyn ProgressStore>,
    table_id: &str,
    display_name: &str,
) -> Result<TableEntity, EngineError> {
    match store.get_table(table_id.to_string()).await {
        Ok(table) => return Ok(table),
        Err(StoreError::NotFound { .. }) => {}
        Err(err) => return Err(err.into()),
    }

    match store
        .create_table(table_id.to_string(), display_name.to_string())
        .await
    {
        Ok(table) => {
            info!(table_id, "created leaderboard table");
            Ok(table)
        }
        Err(StoreError::AlreadyExists { .. }) => {
            debug!(table_id, "table created concurrently; fetching");
            store.get_table(table_id.to_string()).await.map_err(Into::into)
        }
        Err(err) => Err(err.into()),
    }
}

/// Flip the archive flag on a table's metadata.
pub async fn archive_table(
    store: &Arc<dyn ProgressStore>,
    table_id: &str,
    archived: bool,
) -> Result<TableEntity, EngineError> {
    store
        .patch_table(
            table_id.to_string(),
            TablePatch {
                display_name: None,
                is_archived: Some(archived),
            },
        )
        .await
        .map_err(Into::into)
}

/// Change a table's display name.
pub async fn rename_table(
    store: &Arc<dyn ProgressStore>,
    table_id: &str,
    display_name: &str,
) -> Result<TableEntity, EngineError> {
    store
        .patch_table(
            table_id.to_string(),
            TablePatch {
                display_name: Some(display_name.to_string()),
                is_archived: None,
            },
        )
        .await
        .map_err(Into::into)
}

/// Derive a stable table identifier from a playground URL.
///
/// The first hostname label identifies the playground; the label after
/// `execute-api` identifies the region. With region naming enforced the id
/// is `<playground>-<region>-scores`, otherwise `<playground>-scores`.
/// When the host cannot be parsed, the last safe path segment is used, and
/// failing that a conservative fallback.
pub fn derive_table_id(playground_url: &str, enforce_region_naming: bool) -> String {
    let Ok(url) = Url::parse(playground_url.trim()) else {
        return format!("{TABLE_ID_FALLBACK}{TABLE_ID_SUFFIX}");
    };

    let labels: Vec<&str> = url
        .host_str()
        .map(|host| host.split('.').collect())
        .unwrap_or_default();

    let playground_id = labels
        .first()
        .copied()
        .filter(|label| !label.is_empty())
        .or_else(|| {
            url.path_segments().and_then(|segments| {
                segments
                    .filter(|segment| !segment.is_empty() && is_safe_segment(segment))
                    .last()
            })
        });

    let region = labels
        .iter()
        .position(|label| *label == "execute-api")
        .and_then(|index| labels.get(index + 1))
        .copied();

    match (playground_id, region) {
        (Some(id), Some(region)) if enforce_region_naming => {
            format!("{}-{region}{TABLE_ID_SUFFIX}", id.to_ascii_lowercase())
        }
        (Some(id), _) => format!("{}{TABLE_ID_SUFFIX}", id.to_ascii_lowercase()),
        (None, _) => format!("{TABLE_ID_FALLBACK}{TABLE_ID_SUFFIX}"),
    }
}

fn is_safe_segment(segment: &str) -> bool {
    segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
}
