//! Operator inspection surface: counts, entry details, retry and discard.
//!
//! Controls only touch queue metadata and rollback snapshots. Discard is
//! reserved for failed entries; a pending or in-flight entry may already be
//! on its way to the remote.

use crate::engine::{now_ms, SyncEngine};
use crate::error::{ClientError, Result};
use crate::events::{QueueEvent, Trigger};
use crate::storage;
use ferry_engine::{
    EntryId, EntryStatus, IdempotencyKey, OperationKind, QueueEntry, QueueSummary,
    ReconcileReport, TableName, Timestamp,
};
use serde::Serialize;

/// One entry as shown to an operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryView {
    pub id: EntryId,
    pub table: TableName,
    pub operation: OperationKind,
    pub description: String,
    pub idempotency_key: IdempotencyKey,
    pub status: EntryStatus,
    pub retry_count: u32,
    pub error: Option<String>,
    pub created_at: Timestamp,
}

impl From<&QueueEntry> for EntryView {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            id: entry.id,
            table: entry.table.clone(),
            operation: entry.operation,
            description: entry.describe(),
            idempotency_key: entry.idempotency_key.clone(),
            status: entry.status,
            retry_count: entry.retry_count,
            error: entry.error.clone(),
            created_at: entry.created_at,
        }
    }
}

impl SyncEngine {
    pub async fn summary(&self) -> QueueSummary {
        self.inner.state.lock().await.queue.summary()
    }

    /// Every queued entry in id order.
    pub async fn entries(&self) -> Vec<EntryView> {
        let state = self.inner.state.lock().await;
        state.queue.iter().map(EntryView::from).collect()
    }

    pub async fn entry(&self, id: EntryId) -> Option<EntryView> {
        let state = self.inner.state.lock().await;
        state.queue.get(id).map(EntryView::from)
    }

    pub async fn list_by_status(&self, status: EntryStatus) -> Vec<EntryId> {
        self.inner.state.lock().await.queue.list_by_status(status)
    }

    /// Optimistic snapshots not yet committed or reverted.
    pub async fn pending_snapshots(&self) -> usize {
        self.inner.state.lock().await.coordinator.snapshot_count()
    }

    /// Give a failed entry a fresh attempt budget, or let a backing-off one go
    /// now, then run a pass immediately.
    ///
    /// Returns `false` for absent, in-flight or synced entries.
    pub async fn retry_one(&self, id: EntryId) -> Result<bool> {
        let summary = {
            let mut state = self.inner.state.lock().await;
            if !state.queue.retry_now(id, now_ms())? {
                return Ok(false);
            }
            if let Some(entry) = state.queue.get(id) {
                storage::save_entry_state(&self.inner.pool, entry).await?;
            }
            state.queue.summary()
        };

        tracing::info!(entry_id = id, "operator retry");
        self.emit(QueueEvent::Changed(summary));
        self.run_pass().await;
        Ok(true)
    }

    /// Revert and remove one failed entry.
    ///
    /// Discarding an absent id is a no-op returning `false`.
    pub async fn discard_one(&self, id: EntryId) -> Result<bool> {
        let summary = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let Some(status) = state.queue.get(id).map(|e| e.status) else {
                return Ok(false);
            };
            if status != EntryStatus::Failed {
                return Err(ClientError::NotDiscardable { id, status });
            }

            // Revert a copy; local state only moves once the store has.
            let mut coordinator = state.coordinator.clone();
            let mut tx = self.inner.pool.begin().await?;
            storage::delete_entry(&mut *tx, id).await?;
            if let Some(report) = coordinator.revert(id) {
                if report.superseded > 0 {
                    tracing::debug!(entry_id = id, superseded = report.superseded, "newer writes kept");
                }
                storage::write_changes(&mut *tx, &report.restored, now_ms()).await?;
            }
            tx.commit().await?;

            state.coordinator = coordinator;
            state.queue.remove(id)?;
            state.queue.summary()
        };

        tracing::info!(entry_id = id, "operator discarded entry");
        self.emit(QueueEvent::Changed(summary));
        self.trigger(Trigger::Discarded);
        Ok(true)
    }

    /// Revert and remove every failed entry in one batch, newest first.
    pub async fn discard_all(&self) -> Result<usize> {
        let (discarded, summary) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let failed = state.queue.list_by_status(EntryStatus::Failed);
            if failed.is_empty() {
                return Ok(0);
            }

            let now = now_ms();
            let mut coordinator = state.coordinator.clone();
            let mut tx = self.inner.pool.begin().await?;
            for &id in failed.iter().rev() {
                storage::delete_entry(&mut *tx, id).await?;
                if let Some(report) = coordinator.revert(id) {
                    storage::write_changes(&mut *tx, &report.restored, now).await?;
                }
            }
            tx.commit().await?;
            state.coordinator = coordinator;

            for &id in &failed {
                state.queue.remove(id)?;
            }
            (failed.len(), state.queue.summary())
        };

        tracing::info!(count = discarded, "operator discarded all failed entries");
        self.emit(QueueEvent::Changed(summary));
        self.trigger(Trigger::Discarded);
        Ok(discarded)
    }

    /// Refetch one table and fold it into local state.
    ///
    /// Records owned by outstanding entries keep their optimistic value.
    pub async fn refresh_table(&self, table: &str) -> Result<ReconcileReport> {
        let records = self.inner.remote.fetch(table).await?;

        let report = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let protected = state.queue.outstanding_records();
            let report = state
                .coordinator
                .reconcile_table(table, records, &protected)?;

            let mut tx = self.inner.pool.begin().await?;
            storage::write_changes(&mut *tx, &report.changes, now_ms()).await?;
            tx.commit().await?;
            report
        };

        tracing::debug!(
            table,
            replaced = report.replaced,
            kept_local = report.kept_local,
            removed = report.removed,
            "table reconciled"
        );
        self.emit(QueueEvent::Reconciled {
            table: report.table.clone(),
            replaced: report.replaced,
            removed: report.removed,
        });
        Ok(report)
    }

    /// Refetch every watched table.
    pub async fn refresh_views(&self) -> Result<Vec<ReconcileReport>> {
        let mut reports = Vec::new();
        for table in self.watched_tables() {
            reports.push(self.refresh_table(&table).await?);
        }
        Ok(reports)
    }
}
