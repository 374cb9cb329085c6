//! The device-side sync engine handle.

use crate::config::ClientConfig;
use crate::dispatcher::PassGate;
use crate::error::{ClientError, Result};
use crate::events::{ConnectivitySignal, QueueEvent, Trigger};
use crate::remote::{HttpRemote, RemoteStore};
use crate::storage::{self, Pool};
use ferry_engine::{
    EntryId, IdempotencyKey, LocalState, Mutation, MutationQueue, OptimisticCoordinator,
    QueueEntry, Schema, TableName, Timestamp,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::{broadcast, mpsc, watch, Mutex};

const EVENT_CAPACITY: usize = 64;

/// Queue and optimistic state, guarded together so an enqueue and its
/// optimistic apply are never observed apart.
pub(crate) struct EngineState {
    pub(crate) queue: MutationQueue,
    pub(crate) coordinator: OptimisticCoordinator,
}

pub(crate) struct Inner {
    pub(crate) config: ClientConfig,
    pub(crate) schema: Schema,
    pub(crate) pool: Pool,
    pub(crate) remote: Arc<dyn RemoteStore>,
    pub(crate) state: Mutex<EngineState>,
    pub(crate) gate: PassGate,
    online: AtomicBool,
    events: broadcast::Sender<QueueEvent>,
    triggers: mpsc::Sender<Trigger>,
    pub(crate) trigger_rx: std::sync::Mutex<Option<mpsc::Receiver<Trigger>>>,
    watched: std::sync::Mutex<BTreeSet<TableName>>,
    pub(crate) shutdown: watch::Sender<bool>,
}

/// Cheaply cloneable handle to one device's queue, local state and remote.
///
/// Every domain write goes through [`enqueue_mutation`](Self::enqueue_mutation);
/// the handle is the single owner of the queue for the application session.
#[derive(Clone)]
pub struct SyncEngine {
    pub(crate) inner: Arc<Inner>,
}

impl SyncEngine {
    /// Open the local store at `config.database_url` and talk HTTP to
    /// `config.remote_url`.
    pub async fn connect(config: ClientConfig, schema: Schema) -> Result<Self> {
        let remote = HttpRemote::from_config(&config)?;
        Self::open(config, schema, Arc::new(remote)).await
    }

    /// Open the local store with any remote implementation.
    pub async fn open(
        config: ClientConfig,
        schema: Schema,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self> {
        let pool = storage::create_pool(&config).await?;
        Self::with_pool(config, schema, pool, remote).await
    }

    /// Build an engine over an existing pool. Runs migrations and recovers
    /// entries a crash left in flight.
    pub async fn with_pool(
        config: ClientConfig,
        schema: Schema,
        pool: Pool,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self> {
        storage::run_migrations(&pool).await?;

        let recovered = storage::recover_in_flight(&pool).await?;
        if recovered > 0 {
            tracing::warn!(count = recovered, "recovered in-flight entries after restart");
        }

        let entries = storage::load_entries(&pool).await?;
        let records = storage::load_records(&pool).await?;
        tracing::info!(
            device = %config.device_id,
            entries = entries.len(),
            cached = records.len(),
            "sync engine opened"
        );

        let state = EngineState {
            queue: MutationQueue::restore(entries),
            coordinator: OptimisticCoordinator::with_state(LocalState::from_records(records)),
        };

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (triggers, trigger_rx) = mpsc::channel(config.trigger_capacity.max(1));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                schema,
                pool,
                remote,
                state: Mutex::new(state),
                gate: PassGate::default(),
                online: AtomicBool::new(true),
                events,
                triggers,
                trigger_rx: std::sync::Mutex::new(Some(trigger_rx)),
                watched: std::sync::Mutex::new(BTreeSet::new()),
                shutdown,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Apply a mutation locally and queue it for the remote, atomically.
    ///
    /// On return the optimistic effect is visible and the entry is durable.
    /// On error neither happened.
    pub async fn enqueue_mutation(
        &self,
        user_id: &str,
        mutation: Mutation,
    ) -> Result<EntryId> {
        self.inner.schema.validate_mutation(&mutation)?;

        let key = IdempotencyKey::generate();
        let now = now_ms();

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        let mut tx = self.inner.pool.begin().await?;
        let id = storage::insert_entry(&mut *tx, &mutation, user_id, &key, now).await?;
        let entry = QueueEntry::new(id, mutation, user_id, key, now);
        state.queue.check_insert(&entry)?;

        let applied = state.coordinator.apply(id, &entry.mutation())?;
        let persisted = async move {
            storage::write_changes(&mut *tx, &applied.changes, now).await?;
            tx.commit().await?;
            Ok::<_, ClientError>(())
        }
        .await;
        if let Err(e) = persisted {
            state.coordinator.revert(id);
            tracing::error!(error = %e, table = %entry.table, "enqueue failed, optimistic apply reverted");
            return Err(e);
        }

        tracing::debug!(entry_id = id, table = %entry.table, operation = %entry.operation, "mutation enqueued");
        state.queue.insert(entry)?;
        let summary = state.queue.summary();
        drop(guard);

        self.emit(QueueEvent::Changed(summary));
        self.trigger(Trigger::Enqueued);
        Ok(id)
    }

    /// Current local value of a record, optimistic effects included.
    pub async fn record(&self, table: &str, id: &str) -> Option<Value> {
        let state = self.inner.state.lock().await;
        state
            .coordinator
            .state()
            .get(table, id)
            .map(|r| r.payload.clone())
    }

    /// Every local record of a table, ordered by id.
    pub async fn records(&self, table: &str) -> Vec<Value> {
        let state = self.inner.state.lock().await;
        state
            .coordinator
            .state()
            .records(table)
            .map(|r| r.payload.clone())
            .collect()
    }

    /// Mark a table as displayed, so reconciliation refetches it.
    pub fn watch(&self, table: impl Into<TableName>) {
        self.watched().insert(table.into());
    }

    pub fn unwatch(&self, table: &str) {
        self.watched().remove(table);
    }

    pub(crate) fn watched_tables(&self) -> Vec<TableName> {
        self.watched().iter().cloned().collect()
    }

    fn watched(&self) -> std::sync::MutexGuard<'_, BTreeSet<TableName>> {
        self.inner
            .watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// When the earliest backed-off entry comes due.
    pub(crate) async fn next_retry_at(&self) -> Option<Timestamp> {
        self.inner.state.lock().await.queue.next_retry_at()
    }

    /// Receive queue notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Report a platform connectivity change.
    pub fn connectivity_changed(&self, signal: ConnectivitySignal) {
        let online = signal == ConnectivitySignal::Online;
        let was = self.inner.online.swap(online, Ordering::SeqCst);
        if was != online {
            tracing::info!(online, "connectivity changed");
        }
        self.trigger(Trigger::Connectivity(signal));
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Stop background work and close the local store.
    pub async fn close(&self) {
        let _ = self.inner.shutdown.send(true);
        self.inner.pool.close().await;
    }

    pub(crate) fn emit(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn trigger(&self, trigger: Trigger) {
        if let Err(e) = self.inner.triggers.try_send(trigger) {
            // A full channel already holds a wake-up; a pass drains everything.
            tracing::trace!(error = %e, "trigger dropped");
        }
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
