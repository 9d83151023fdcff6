//! Debounced write synchronisation to the backing store.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{ParticipantEntity, ParticipantUpdate},
        progress_store::ProgressStore,
        storage::StoreError,
    },
    error::EngineError,
};

/// Default delay before re-attempting a failed flush.
const RETRY_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Upper bound applied to the flush retry delay.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// Latest payload to persist for one participant.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPayload {
    /// Table the write targets.
    pub table_id: String,
    /// Row contents to upsert.
    pub update: ParticipantUpdate,
}

enum Command {
    /// Replace the pending payload and restart the quiet interval.
    Update(SyncPayload),
    /// Flush immediately, reporting the write outcome.
    Flush(oneshot::Sender<Result<Option<ParticipantEntity>, EngineError>>),
}

#[derive(Debug, Error)]
#[error("synchronizer worker terminated")]
struct WorkerGone;

/// Debounces participant writes so bursts collapse into a bounded write
/// rate while the store still eventually reflects the latest local state.
///
/// One spawned task per username owns that participant's pending payload,
/// so writes for a username are strictly serialized: the task awaits each
/// store call before touching the next command, which is the single-flight
/// invariant.
pub struct Synchronizer {
    store: Arc<dyn ProgressStore>,
    quiet: Duration,
    workers: DashMap<String, mpsc::UnboundedSender<Command>>,
}

impl Synchronizer {
    /// Build a synchronizer flushing after `quiet` of inactivity.
    pub fn new(store: Arc<dyn ProgressStore>, quiet: Duration) -> Self {
        Self {
            store,
            quiet,
            workers: DashMap::new(),
        }
    }

    /// Queue `payload` as the latest state for `username`.
    ///
    /// An earlier pending payload is superseded, never lost: the new one
    /// strictly subsumes it because scores and task sets only grow.
    pub fn enqueue(&self, username: &str, payload: SyncPayload) {
        self.send(username, Command::Update(payload));
    }

    /// Flush `username`'s pending payload now, bypassing the quiet interval.
    ///
    /// Serializes behind any in-flight write for the same participant and
    /// returns the written row, or `None` when nothing was pending.
    pub async fn flush_now(
        &self,
        username: &str,
    ) -> Result<Option<ParticipantEntity>, EngineError> {
        let (reply, outcome) = oneshot::channel();
        self.send(username, Command::Flush(reply));
        outcome.await.map_err(|_| {
            EngineError::Unavailable(StoreError::unavailable(
                "synchronizer worker terminated".into(),
                WorkerGone,
            ))
        })?
    }

    /// Flush every participant's pending payload; used on graceful shutdown.
    pub async fn flush_all(&self) {
        let usernames: Vec<String> = self
            .workers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for username in usernames {
            if let Err(err) = self.flush_now(&username).await {
                warn!(username = %username, error = %err, "final flush failed");
            }
        }
    }

    fn send(&self, username: &str, command: Command) {
        let mut command = command;
        loop {
            let tx = self
                .workers
                .entry(username.to_string())
                .or_insert_with(|| self.spawn_worker(username.to_string()))
                .clone();

            match tx.send(command) {
                Ok(()) => return,
                Err(mpsc::error::SendError(rejected)) => {
                    // Worker is gone (e.g. runtime shutdown mid-test); drop
                    // the dead sender and spawn a replacement.
                    command = rejected;
                    self.workers.remove(username);
                }
            }
        }
    }

    fn spawn_worker(&self, username: String) -> mpsc::UnboundedSender<Command> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            store: self.store.clone(),
            username,
            quiet: self.quiet,
        };
        tokio::spawn(worker.run(rx));
        tx
    }
}

/// Per-username debounce state machine: Idle, Pending (payload + deadline),
/// and Flushing while a store call is in flight.
struct Worker {
    store: Arc<dyn ProgressStore>,
    username: String,
    quiet: Duration,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut pending: Option<SyncPayload> = None;
        let mut last_sent: Option<SyncPayload> = None;
        let mut deadline: Option<Instant> = None;
        let mut backoff = RETRY_INITIAL_DELAY;

        loop {
            let command = match deadline {
                Some(when) => tokio::select! {
                    command = rx.recv() => match command {
                        Some(command) => Some(command),
                        None => break,
                    },
                    _ = sleep_until(when) => None,
                },
                None => match rx.recv().await {
                    Some(command) => Some(command),
                    None => break,
                },
            };

            match command {
                Some(Command::Update(payload)) => {
                    // Latest wins; the quiet interval restarts.
                    pending = Some(payload);
                    deadline = Some(Instant::now() + self.quiet);
                }
                Some(Command::Flush(reply)) => {
                    let outcome = self.flush(&mut pending, &mut last_sent).await;
                    match &outcome {
                        Ok(_) => {
                            deadline = None;
                            backoff = RETRY_INITIAL_DELAY;
                        }
                        Err(_) => {
                            deadline = Some(Instant::now() + backoff);
                            backoff = (backoff * 2).min(RETRY_MAX_DELAY);
                        }
                    }
                    let _ = reply.send(outcome);
                }
                // Quiet interval elapsed.
                None => match self.flush(&mut pending, &mut last_sent).await {
                    Ok(_) => {
                        deadline = None;
                        backoff = RETRY_INITIAL_DELAY;
                    }
                    Err(err) => {
                        warn!(
                            username = %self.username,
                            error = %err,
                            "participant flush failed; retrying after backoff"
                        );
                        deadline = Some(Instant::now() + backoff);
                        backoff = (backoff * 2).min(RETRY_MAX_DELAY);
                    }
                },
            }
        }

        // Channel closed: one final attempt so the latest local state is
        // not lost.
        if pending.is_some() {
            if let Err(err) = self.flush(&mut pending, &mut last_sent).await {
                warn!(
                    username = %self.username,
                    error = %err,
                    "final flush on shutdown failed"
                );
            }
        }
    }

    /// Issue exactly one store write carrying the latest pending payload.
    ///
    /// On failure the payload is put back so the retry (or a superseding
    /// update) picks it up; nothing collapsed into it is dropped.
    async fn flush(
        &self,
        pending: &mut Option<SyncPayload>,
        last_sent: &mut Option<SyncPayload>,
    ) -> Result<Option<ParticipantEntity>, EngineError> {
        let Some(payload) = pending.take() else {
            return Ok(None);
        };

        if last_sent.as_ref() == Some(&payload) {
            // The store already has exactly this state.
            return Ok(None);
        }

        let flush_id = Uuid::new_v4();
        debug!(
            username = %self.username,
            %flush_id,
            table_id = %payload.table_id,
            score = payload.update.composite_score,
            "flushing participant update"
        );

        match self
            .store
            .put_user(
                payload.table_id.clone(),
                self.username.clone(),
                payload.update.clone(),
            )
            .await
        {
            Ok(entity) => {
                *last_sent = Some(payload);
                Ok(Some(entity))
            }
            Err(err) => {
                *pending = Some(payload);
                Err(EngineError::from(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::SystemTime;

    use futures::future::BoxFuture;
    use tokio::sync::Mutex as AsyncMutex;

    use crate::dao::models::{Page, PageRequest, TableEntity, TablePatch};
    use crate::dao::storage::StoreResult;

    /// Store fake recording every accepted write and tracking concurrency.
    #[derive(Clone)]
    struct RecordingStore {
        inner: Arc<Inner>,
    }

    struct Inner {
        writes: AsyncMutex<Vec<(String, ParticipantUpdate)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_next: AtomicU32,
        write_delay: Duration,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self::with_delay(Duration::ZERO)
        }

        fn with_delay(write_delay: Duration) -> Self {
            Self {
                inner: Arc::new(Inner {
                    writes: AsyncMutex::new(Vec::new()),
                    in_flight: AtomicUsize::new(0),
                    max_in_flight: AtomicUsize::new(0),
                    fail_next: AtomicU32::new(0),
                    write_delay,
                }),
            }
        }

        fn fail_next(&self, count: u32) {
            self.inner.fail_next.store(count, Ordering::SeqCst);
        }

        fn max_in_flight(&self) -> usize {
            self.inner.max_in_flight.load(Ordering::SeqCst)
        }

        async fn writes(&self) -> Vec<(String, ParticipantUpdate)> {
            self.inner.writes.lock().await.clone()
        }
    }

    fn entity_for(username: &str, update: &ParticipantUpdate) -> ParticipantEntity {
        ParticipantEntity {
            username: username.to_string(),
            table_id: "demo-scores".to_string(),
            composite_score: update.composite_score,
            team_name: update.team_name.clone(),
            completed_task_ids: update.completed_task_ids.clone(),
            tasks_completed: update.tasks_completed,
            total_tasks: update.total_tasks,
            primary_metric: update.primary_metric,
            last_updated: SystemTime::now(),
        }
    }

    fn payload(tasks_completed: u32) -> SyncPayload {
        SyncPayload {
            table_id: "demo-scores".to_string(),
            update: ParticipantUpdate {
                composite_score: 0.8 * (f64::from(tasks_completed) / 20.0),
                team_name: None,
                completed_task_ids: (1..=tasks_completed)
                    .map(|i| format!("t{i}"))
                    .collect::<BTreeSet<_>>(),
                tasks_completed,
                total_tasks: 20,
                primary_metric: 0.8,
            },
        }
    }

    impl ProgressStore for RecordingStore {
        fn create_table(
            &self,
            _table_id: String,
            _display_name: String,
        ) -> BoxFuture<'static, StoreResult<TableEntity>> {
            unreachable!("not used in sync tests")
        }

        fn get_table(&self, _table_id: String) -> BoxFuture<'static, StoreResult<TableEntity>> {
            unreachable!("not used in sync tests")
        }

        fn patch_table(
            &self,
            _table_id: String,
            _patch: TablePatch,
        ) -> BoxFuture<'static, StoreResult<TableEntity>> {
            unreachable!("not used in sync tests")
        }

        fn list_tables(
            &self,
            _page: PageRequest,
        ) -> BoxFuture<'static, StoreResult<Page<TableEntity>>> {
            unreachable!("not used in sync tests")
        }

        fn put_user(
            &self,
            _table_id: String,
            username: String,
            update: ParticipantUpdate,
        ) -> BoxFuture<'static, StoreResult<ParticipantEntity>> {
            let inner = self.inner.clone();
            Box::pin(async move {
                let current = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                inner.max_in_flight.fetch_max(current, Ordering::SeqCst);
                if !inner.write_delay.is_zero() {
                    tokio::time::sleep(inner.write_delay).await;
                }
                inner.in_flight.fetch_sub(1, Ordering::SeqCst);

                if inner.fail_next.load(Ordering::SeqCst) > 0 {
                    inner.fail_next.fetch_sub(1, Ordering::SeqCst);
                    return Err(StoreError::unavailable(
                        "injected failure".into(),
                        std::io::Error::new(std::io::ErrorKind::Other, "down"),
                    ));
                }

                let entity = entity_for(&username, &update);
                inner.writes.lock().await.push((username, update));
                Ok(entity)
            })
        }

        fn get_user(
            &self,
            _table_id: String,
            _username: String,
        ) -> BoxFuture<'static, StoreResult<ParticipantEntity>> {
            unreachable!("not used in sync tests")
        }

        fn list_users(
            &self,
            _table_id: String,
            _page: PageRequest,
        ) -> BoxFuture<'static, StoreResult<Page<ParticipantEntity>>> {
            unreachable!("not used in sync tests")
        }

        fn health_check(&self) -> BoxFuture<'static, StoreResult<()>> {
            unreachable!("not used in sync tests")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_write_with_latest_payload() {
        let store = RecordingStore::new();
        let sync = Synchronizer::new(Arc::new(store.clone()), Duration::from_secs(2));

        // Ten rapid events well inside one quiet interval.
        for i in 1..=10 {
            sync.enqueue("alice", payload(i));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;

        let writes = store.writes().await;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "alice");
        assert_eq!(writes[0].1.tasks_completed, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_for_one_username_never_overlap() {
        let store = RecordingStore::with_delay(Duration::from_millis(250));
        let sync = Arc::new(Synchronizer::new(
            Arc::new(store.clone()),
            Duration::from_millis(10),
        ));

        let mut handles = Vec::new();
        for i in 1..=8 {
            let sync = sync.clone();
            handles.push(tokio::spawn(async move {
                sync.enqueue("alice", payload(i));
                let _ = sync.flush_now("alice").await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.max_in_flight(), 1);
        assert!(!store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn force_flush_bypasses_quiet_interval() {
        let store = RecordingStore::new();
        let sync = Synchronizer::new(Arc::new(store.clone()), Duration::from_secs(3600));

        sync.enqueue("alice", payload(3));
        let written = sync.flush_now("alice").await.unwrap();

        assert_eq!(written.unwrap().tasks_completed, 3);
        assert_eq!(store.writes().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_is_requeued_and_retried() {
        let store = RecordingStore::new();
        store.fail_next(1);
        let sync = Synchronizer::new(Arc::new(store.clone()), Duration::from_millis(100));

        sync.enqueue("alice", payload(5));
        tokio::time::sleep(Duration::from_secs(10)).await;

        let writes = store.writes().await;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1.tasks_completed, 5);
    }

    #[tokio::test]
    async fn identical_payload_is_not_rewritten() {
        let store = RecordingStore::new();
        let sync = Synchronizer::new(Arc::new(store.clone()), Duration::from_secs(3600));

        sync.enqueue("alice", payload(3));
        sync.flush_now("alice").await.unwrap();
        sync.enqueue("alice", payload(3));
        let written = sync.flush_now("alice").await.unwrap();

        assert!(written.is_none());
        assert_eq!(store.writes().await.len(), 1);
    }

    #[tokio::test]
    async fn flush_all_drains_every_pending_participant() {
        let store = RecordingStore::new();
        let sync = Synchronizer::new(Arc::new(store.clone()), Duration::from_secs(3600));

        sync.enqueue("alice", payload(1));
        sync.enqueue("bob", payload(2));
        sync.flush_all().await;

        let mut usernames: Vec<String> = store
            .writes()
            .await
            .into_iter()
            .map(|(username, _)| username)
            .collect();
        usernames.sort();
        assert_eq!(usernames, vec!["alice", "bob"]);
    }
}
