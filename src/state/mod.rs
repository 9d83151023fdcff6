//! Shared engine state owned by a single long-lived coordinator.

pub mod progress;

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use tokio::sync::watch;
use tracing::warn;

use crate::{
    config::EngineConfig,
    dao::{
        models::{ParticipantEntity, ParticipantUpdate, TableEntity},
        progress_store::ProgressStore,
    },
    error::EngineError,
    services::{
        leaderboard_cache::LeaderboardCache,
        rank_service::{self, RankView, ScoreOverride, TeamStanding},
        sync_service::{SyncPayload, Synchronizer},
        table_service,
    },
};

use self::progress::ProgressState;

/// Shared handle to the engine coordinator.
pub type SharedEngine = Arc<EngineState>;

/// Outcome of a write-then-rank cycle, consumed by the presentation layer.
#[derive(Debug, Clone)]
pub struct ProgressReport {
    /// Score reported by the previous cycle, if any.
    pub previous_score: Option<f64>,
    /// Score after this cycle.
    pub new_score: f64,
    /// Rank reported by the previous cycle.
    pub previous_rank: Option<usize>,
    /// Rank after this cycle; `None` means not yet ranked.
    pub new_rank: Option<usize>,
    /// Team rank reported by the previous cycle.
    pub previous_team_rank: Option<usize>,
    /// Team rank after this cycle; `None` when the caller has no team.
    pub new_team_rank: Option<usize>,
    /// Full individual leaderboard, best first.
    pub sorted_users: Vec<ParticipantEntity>,
    /// Full team leaderboard, best first.
    pub sorted_teams: Vec<TeamStanding>,
    /// The caller's completed tasks.
    pub completed_task_ids: BTreeSet<String>,
    /// True when ranks were computed from a stale snapshot because the
    /// store could not be reached.
    pub stale: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct LastStanding {
    score: Option<f64>,
    rank: Option<usize>,
    team_rank: Option<usize>,
}

/// Central coordinator owning every per-process cache and debounce table.
///
/// Constructed once per process at startup and shared behind an [`Arc`].
/// All mutable state lives inside and is reached only through methods,
/// never as ambient globals.
pub struct EngineState {
    config: EngineConfig,
    store: Arc<dyn ProgressStore>,
    cache: LeaderboardCache,
    synchronizer: Synchronizer,
    progress: DashMap<String, ProgressState>,
    standings: DashMap<String, LastStanding>,
    degraded: watch::Sender<bool>,
}

impl EngineState {
    /// Construct the engine once per process, wrapped in an [`Arc`] so it
    /// can be cloned cheaply into every caller.
    pub fn new(config: EngineConfig, store: Arc<dyn ProgressStore>) -> SharedEngine {
        let (degraded, _rx) = watch::channel(false);
        Arc::new(Self {
            cache: LeaderboardCache::new(
                config.cache_ttl,
                config.page_size,
                config.max_leaderboard_entries,
            ),
            synchronizer: Synchronizer::new(store.clone(), config.debounce_quiet),
            progress: DashMap::new(),
            standings: DashMap::new(),
            degraded,
            store,
            config,
        })
    }

    /// Handle to the backing store, shared with table management flows.
    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    /// Record a metric observation for `username`; no store traffic.
    pub fn set_metric(&self, username: &str, name: &str, value: f64, primary: bool) {
        self.progress_entry(username).set_metric(name, value, primary);
    }

    /// Assign (or clear) `username`'s team, carried by subsequent writes.
    pub fn assign_team(&self, username: &str, team_name: Option<String>) {
        self.progress_entry(username).assign_team(team_name);
    }

    /// Locally computed score preview for `username`; no store traffic.
    pub fn local_score(&self, username: &str) -> Result<f64, EngineError> {
        self.progress_entry(username).local_score()
    }

    /// Record a completed task and run the full write-then-rank cycle.
    ///
    /// The store write is debounced; ranking applies an optimistic override
    /// so the caller sees the just-computed score reflected before the
    /// store's read path catches up.
    pub async fn complete_task(
        &self,
        table_id: &str,
        username: &str,
        task_id: &str,
    ) -> Result<ProgressReport, EngineError> {
        let (payload, override_row) = {
            let mut progress = self.progress_entry(username);
            progress.complete_task(task_id);
            let update = progress.to_update()?;
            let override_row = override_from(username, &update);
            (
                SyncPayload {
                    table_id: table_id.to_string(),
                    update,
                },
                override_row,
            )
        };

        self.synchronizer.enqueue(username, payload);
        self.report(table_id, username, Some(override_row)).await
    }

    /// Force-flush `username`'s pending write, then rank against a fresh
    /// snapshot. Meant for decision-relevant displays.
    pub async fn sync_now(
        &self,
        table_id: &str,
        username: &str,
    ) -> Result<ProgressReport, EngineError> {
        self.synchronizer.flush_now(username).await?;
        self.cache.invalidate(table_id);
        let override_row = self.current_override(username)?;
        self.report(table_id, username, override_row).await
    }

    /// Current standings for `username`, served from the snapshot cache.
    pub async fn ranks(&self, table_id: &str, username: &str) -> Result<RankView, EngineError> {
        let snapshot = self.cache.snapshot(&self.store, table_id).await?;
        self.note_degraded(snapshot.stale);
        Ok(rank_service::rank_view(&snapshot, username, None))
    }

    /// Fetch a table, creating it when absent.
    pub async fn ensure_table(
        &self,
        table_id: &str,
        display_name: &str,
    ) -> Result<TableEntity, EngineError> {
        table_service::ensure_table(&self.store, table_id, display_name).await
    }

    /// Probe the backing store, updating the degraded flag.
    pub async fn health(&self) -> bool {
        match self.store.health_check().await {
            Ok(()) => {
                self.note_degraded(false);
                true
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                self.note_degraded(true);
                false
            }
        }
    }

    /// Subscribe to degraded-mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Flush every pending write; call once before process shutdown.
    pub async fn shutdown(&self) {
        self.synchronizer.flush_all().await;
    }

    fn progress_entry(&self, username: &str) -> RefMut<'_, String, ProgressState> {
        self.progress
            .entry(username.to_string())
            .or_insert_with(|| ProgressState::new(self.config.total_tasks))
    }

    /// Build an optimistic override from the local progress state, if any.
    fn current_override(&self, username: &str) -> Result<Option<ScoreOverride>, EngineError> {
        match self.progress.get(username) {
            Some(progress) => {
                let update = progress.to_update()?;
                Ok(Some(override_from(username, &update)))
            }
            None => Ok(None),
        }
    }

    async fn report(
        &self,
        table_id: &str,
        username: &str,
        override_row: Option<ScoreOverride>,
    ) -> Result<ProgressReport, EngineError> {
        // Write-triggering flows must not trust the TTL.
        let snapshot = self.cache.snapshot_fresh(&self.store, table_id).await?;
        self.note_degraded(snapshot.stale);

        let view = rank_service::rank_view(&snapshot, username, override_row.as_ref());
        let current = LastStanding {
            score: view.composite_score,
            rank: view.individual_rank,
            team_rank: view.team_rank,
        };
        let previous = self
            .standings
            .insert(username.to_string(), current)
            .unwrap_or_default();

        Ok(ProgressReport {
            previous_score: previous.score,
            new_score: view.composite_score.unwrap_or(0.0),
            previous_rank: previous.rank,
            new_rank: view.individual_rank,
            previous_team_rank: previous.team_rank,
            new_team_rank: view.team_rank,
            sorted_users: view.sorted_users,
            sorted_teams: view.sorted_teams,
            completed_task_ids: view.completed_task_ids,
            stale: view.stale,
        })
    }

    fn note_degraded(&self, degraded: bool) {
        if *self.degraded.borrow() != degraded {
            let _ = self.degraded.send(degraded);
        }
    }
}

fn override_from(username: &str, update: &ParticipantUpdate) -> ScoreOverride {
    ScoreOverride {
        username: username.to_string(),
        composite_score: update.composite_score,
        team_name: update.team_name.clone(),
        completed_task_ids: update.completed_task_ids.clone(),
        tasks_completed: update.tasks_completed,
        total_tasks: update.total_tasks,
        primary_metric: update.primary_metric,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, SystemTime};

    use futures::future::BoxFuture;

    use crate::dao::models::{Page, PageRequest, TablePatch};
    use crate::dao::storage::{StoreError, StoreResult};

    /// Single-table in-memory store backing the end-to-end scenario.
    #[derive(Clone)]
    struct MemoryStore {
        inner: Arc<MemoryInner>,
    }

    struct MemoryInner {
        users: Mutex<BTreeMap<String, ParticipantEntity>>,
        puts: AtomicU32,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                inner: Arc::new(MemoryInner {
                    users: Mutex::new(BTreeMap::new()),
                    puts: AtomicU32::new(0),
                }),
            }
        }

        fn seed(&self, entity: ParticipantEntity) {
            self.inner
                .users
                .lock()
                .unwrap()
                .insert(entity.username.clone(), entity);
        }

        fn put_count(&self) -> u32 {
            self.inner.puts.load(Ordering::SeqCst)
        }
    }

    impl ProgressStore for MemoryStore {
        fn create_table(
            &self,
            _table_id: String,
            _display_name: String,
        ) -> BoxFuture<'static, StoreResult<TableEntity>> {
            unreachable!("not used in engine tests")
        }

        fn get_table(&self, _table_id: String) -> BoxFuture<'static, StoreResult<TableEntity>> {
            unreachable!("not used in engine tests")
        }

        fn patch_table(
            &self,
            _table_id: String,
            _patch: TablePatch,
        ) -> BoxFuture<'static, StoreResult<TableEntity>> {
            unreachable!("not used in engine tests")
        }

        fn list_tables(
            &self,
            _page: PageRequest,
        ) -> BoxFuture<'static, StoreResult<Page<TableEntity>>> {
            unreachable!("not used in engine tests")
        }

        fn put_user(
            &self,
            table_id: String,
            username: String,
            update: ParticipantUpdate,
        ) -> BoxFuture<'static, StoreResult<ParticipantEntity>> {
            let inner = self.inner.clone();
            Box::pin(async move {
                inner.puts.fetch_add(1, Ordering::SeqCst);
                let entity = ParticipantEntity {
                    username: username.clone(),
                    table_id,
                    composite_score: update.composite_score,
                    team_name: update.team_name,
                    completed_task_ids: update.completed_task_ids,
                    tasks_completed: update.tasks_completed,
                    total_tasks: update.total_tasks,
                    primary_metric: update.primary_metric,
                    last_updated: SystemTime::now(),
                };
                inner
                    .users
                    .lock()
                    .unwrap()
                    .insert(username, entity.clone());
                Ok(entity)
            })
        }

        fn get_user(
            &self,
            _table_id: String,
            username: String,
        ) -> BoxFuture<'static, StoreResult<ParticipantEntity>> {
            let inner = self.inner.clone();
            Box::pin(async move {
                inner
                    .users
                    .lock()
                    .unwrap()
                    .get(&username)
                    .cloned()
                    .ok_or(StoreError::NotFound {
                        what: format!("user `{username}`"),
                    })
            })
        }

        fn list_users(
            &self,
            _table_id: String,
            _page: PageRequest,
        ) -> BoxFuture<'static, StoreResult<Page<ParticipantEntity>>> {
            let inner = self.inner.clone();
            Box::pin(async move {
                let items = inner.users.lock().unwrap().values().cloned().collect();
                Ok(Page {
                    items,
                    next_token: None,
                })
            })
        }

        fn health_check(&self) -> BoxFuture<'static, StoreResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            total_tasks: 20,
            debounce_quiet: Duration::from_secs(2),
            ..EngineConfig::default()
        }
    }

    fn bob() -> ParticipantEntity {
        ParticipantEntity {
            username: "bob".to_string(),
            table_id: "demo-scores".to_string(),
            composite_score: 0.30,
            team_name: None,
            completed_task_ids: BTreeSet::new(),
            tasks_completed: 6,
            total_tasks: 20,
            primary_metric: 1.0,
            last_updated: SystemTime::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_scenario() {
        let memory = MemoryStore::new();
        memory.seed(bob());
        let engine = EngineState::new(config(), Arc::new(memory.clone()));

        engine.set_metric("alice", "accuracy", 0.8, true);
        engine.assign_team("alice", Some("Red".into()));

        // First completed task: score 0.8 * (1/20) = 0.04, ranked below bob.
        let report = engine
            .complete_task("demo-scores", "alice", "t1")
            .await
            .unwrap();
        assert!((report.new_score - 0.04).abs() < 1e-12);
        assert_eq!(report.new_rank, Some(2));
        assert_eq!(report.previous_rank, None);

        // Four more tasks in quick succession; the debounced write has not
        // fired yet.
        let mut last = report;
        for task in ["t2", "t3", "t4", "t5"] {
            last = engine
                .complete_task("demo-scores", "alice", task)
                .await
                .unwrap();
        }
        assert!((last.new_score - 0.20).abs() < 1e-12);
        assert_eq!(last.new_rank, Some(2));
        assert_eq!(last.sorted_users.len(), 2);
        assert_eq!(last.new_team_rank, Some(1));
        assert_eq!(last.sorted_teams.len(), 1);
        assert_eq!(memory.put_count(), 0);

        // Quiet interval elapses: exactly one write carrying all five tasks.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(memory.put_count(), 1);

        let store: Arc<dyn ProgressStore> = Arc::new(memory.clone());
        let stored = store
            .get_user("demo-scores".into(), "alice".into())
            .await
            .unwrap();
        assert_eq!(stored.tasks_completed, 5);
        assert!((stored.composite_score - 0.20).abs() < 1e-12);
        assert_eq!(stored.team_name.as_deref(), Some("Red"));
        assert!((stored.primary_metric - 0.8).abs() < 1e-12);
        assert_eq!(
            stored.completed_task_ids,
            ["t1", "t2", "t3", "t4", "t5"]
                .into_iter()
                .map(str::to_string)
                .collect::<BTreeSet<_>>()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sync_now_flushes_and_reports_deltas() {
        let memory = MemoryStore::new();
        memory.seed(bob());
        let engine = EngineState::new(config(), Arc::new(memory.clone()));

        engine.set_metric("alice", "accuracy", 0.8, true);
        engine
            .complete_task("demo-scores", "alice", "t1")
            .await
            .unwrap();

        // Forced sync lands the write without waiting out the quiet interval.
        let report = engine.sync_now("demo-scores", "alice").await.unwrap();
        assert_eq!(memory.put_count(), 1);
        assert!((report.new_score - 0.04).abs() < 1e-12);
        assert_eq!(report.previous_rank, Some(2));
        assert_eq!(report.new_rank, Some(2));

        // More tasks move alice above bob; the crossing report carries the
        // rank delta.
        engine.set_metric("alice", "accuracy", 0.9, true);
        let mut last = report;
        for task in ["t2", "t3", "t4", "t5", "t6", "t7"] {
            last = engine
                .complete_task("demo-scores", "alice", task)
                .await
                .unwrap();
        }
        assert!((last.new_score - 0.315).abs() < 1e-12);
        assert_eq!(last.previous_rank, Some(2));
        assert_eq!(last.new_rank, Some(1));

        let report = engine.sync_now("demo-scores", "alice").await.unwrap();
        assert_eq!(memory.put_count(), 2);
        assert_eq!(report.new_rank, Some(1));
    }

    #[tokio::test]
    async fn ranks_reads_through_the_cache() {
        let memory = MemoryStore::new();
        memory.seed(bob());
        let engine = EngineState::new(config(), Arc::new(memory.clone()));

        let view = engine.ranks("demo-scores", "bob").await.unwrap();
        assert_eq!(view.individual_rank, Some(1));
        assert_eq!(view.composite_score, Some(0.30));

        let view = engine.ranks("demo-scores", "nobody").await.unwrap();
        assert_eq!(view.individual_rank, None);
    }

    #[tokio::test]
    async fn health_updates_degraded_flag() {
        let memory = MemoryStore::new();
        let engine = EngineState::new(config(), Arc::new(memory));

        let mut watcher = engine.degraded_watcher();
        assert!(engine.health().await);
        assert!(!*watcher.borrow_and_update());
    }
}
