//! Process-wide, time-boxed cache of full leaderboard snapshots.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    dao::{
        models::ParticipantEntity,
        progress_store::{ProgressStore, pages},
        storage::StoreError,
    },
    error::EngineError,
};

/// Point-in-time materialized copy of every participant row in a table.
///
/// Snapshots are immutable once built; ranking works on copies so the
/// cached instance is never touched.
#[derive(Debug, Clone)]
pub struct LeaderboardSnapshot {
    /// Table the snapshot was taken from.
    pub table_id: String,
    /// Participant rows in store iteration order.
    pub participants: Vec<ParticipantEntity>,
    /// When the snapshot was built.
    pub taken_at: Instant,
    /// True when served past its TTL because the store was unreachable.
    pub stale: bool,
}

#[derive(Default)]
struct CacheEntry {
    snapshot: Option<Arc<LeaderboardSnapshot>>,
}

/// Per-table snapshot cache amortising rebuild cost across UI interactions.
///
/// One async mutex per table serialises the rebuild-vs-read decision: the
/// first caller past the TTL rebuilds while concurrent callers wait for the
/// result, so nobody ever observes a half-built snapshot.
pub struct LeaderboardCache {
    entries: DashMap<String, Arc<Mutex<CacheEntry>>>,
    ttl: Duration,
    page_size: usize,
    max_entries: Option<usize>,
}

impl LeaderboardCache {
    /// Build a cache serving snapshots up to `ttl` old.
    pub fn new(ttl: Duration, page_size: usize, max_entries: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            page_size,
            max_entries,
        }
    }

    /// Return the cached snapshot when fresh, rebuilding it otherwise.
    pub async fn snapshot(
        &self,
        store: &Arc<dyn ProgressStore>,
        table_id: &str,
    ) -> Result<Arc<LeaderboardSnapshot>, EngineError> {
        self.snapshot_inner(store, table_id, false).await
    }

    /// Rebuild unconditionally; write-triggering flows must not trust the TTL.
    pub async fn snapshot_fresh(
        &self,
        store: &Arc<dyn ProgressStore>,
        table_id: &str,
    ) -> Result<Arc<LeaderboardSnapshot>, EngineError> {
        self.snapshot_inner(store, table_id, true).await
    }

    /// Drop the cached snapshot for `table_id`, forcing the next read to
    /// rebuild.
    pub fn invalidate(&self, table_id: &str) {
        self.entries.remove(table_id);
    }

    async fn snapshot_inner(
        &self,
        store: &Arc<dyn ProgressStore>,
        table_id: &str,
        force: bool,
    ) -> Result<Arc<LeaderboardSnapshot>, EngineError> {
        let slot = self
            .entries
            .entry(table_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CacheEntry::default())))
            .clone();

        let mut entry = slot.lock().await;

        if !force {
            if let Some(snapshot) = &entry.snapshot {
                if !snapshot.stale && snapshot.taken_at.elapsed() < self.ttl {
                    return Ok(snapshot.clone());
                }
            }
        }

        match self.fetch_all(store, table_id).await {
            Ok(participants) => {
                let snapshot = Arc::new(LeaderboardSnapshot {
                    table_id: table_id.to_string(),
                    participants,
                    taken_at: Instant::now(),
                    stale: false,
                });
                entry.snapshot = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(err) => match &entry.snapshot {
                // Serving stale data beats failing the caller outright; the
                // stale flag lets the presentation layer annotate it.
                Some(previous) => {
                    warn!(
                        table_id,
                        error = %err,
                        "leaderboard refresh failed; serving stale snapshot"
                    );
                    Ok(Arc::new(LeaderboardSnapshot {
                        table_id: previous.table_id.clone(),
                        participants: previous.participants.clone(),
                        taken_at: previous.taken_at,
                        stale: true,
                    }))
                }
                None => Err(EngineError::from(err)),
            },
        }
    }

    async fn fetch_all(
        &self,
        store: &Arc<dyn ProgressStore>,
        table_id: &str,
    ) -> Result<Vec<ParticipantEntity>, StoreError> {
        let participants = pages::collect_users(
            store.clone(),
            table_id.to_string(),
            self.page_size,
            self.max_entries,
        )
        .await?;

        if let Some(limit) = self.max_entries {
            if participants.len() >= limit {
                debug!(table_id, limit, "leaderboard truncated at configured maximum");
            }
        }

        Ok(participants)
    }
}
