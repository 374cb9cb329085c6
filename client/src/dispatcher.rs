//! Sync dispatcher: drains ready entries to the remote.
//!
//! A pass takes the tables with pending work and drains them concurrently.
//! Within a table, entries go out one at a time in id order and the next is
//! only picked once the previous outcome is settled. No lock is held while a
//! submission is on the wire.
//!
//! Passes are single-flight: a trigger that arrives while a pass runs sets a
//! rerun flag instead of starting a second pass, and the running pass loops
//! once more before releasing the gate.

use crate::engine::{now_ms, EngineState, SyncEngine};
use crate::error::Result;
use crate::events::{PassReport, QueueEvent, Trigger};
use crate::storage;
use ferry_engine::{ApplyRequest, Disposition, EntryId, Error, RemoteOutcome, TableName};
use futures::future::join_all;
use std::sync::{Mutex, PoisonError};

/// Result of asking for a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// This call ran the pass, including any reruns requested meanwhile
    Completed(PassReport),
    /// Another pass was running and will run again on our behalf
    Coalesced,
    /// Connectivity is down; nothing was submitted
    Offline,
}

#[derive(Debug, Default)]
struct GateState {
    running: bool,
    rerun: bool,
}

/// Single-flight guard for dispatch passes.
#[derive(Debug, Default)]
pub(crate) struct PassGate {
    state: Mutex<GateState>,
}

impl PassGate {
    /// Claim the gate, or leave a rerun request for the current holder.
    pub(crate) fn try_start(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.running {
            state.rerun = true;
            false
        } else {
            state.running = true;
            true
        }
    }

    /// Release the gate, unless a rerun was requested: then keep it and
    /// return `true` so the holder goes again.
    pub(crate) fn finish(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.rerun {
            state.rerun = false;
            true
        } else {
            state.running = false;
            false
        }
    }
}

impl SyncEngine {
    /// Submit every ready entry, table by table.
    pub async fn run_pass(&self) -> PassOutcome {
        if !self.is_online() {
            tracing::debug!("offline, pass skipped");
            return PassOutcome::Offline;
        }
        if !self.inner.gate.try_start() {
            tracing::debug!("pass already running, coalesced");
            return PassOutcome::Coalesced;
        }

        let mut report = PassReport::default();
        loop {
            report.merge(self.drain_tables().await);
            if !self.inner.gate.finish() {
                break;
            }
            tracing::debug!("rerunning pass for coalesced trigger");
        }

        if report.submitted > 0 || !report.errors.is_empty() {
            tracing::info!(
                submitted = report.submitted,
                synced = report.synced,
                retried = report.retried,
                failed = report.failed,
                "pass completed"
            );
        }
        if report.retried > 0 {
            self.trigger(Trigger::Rescheduled);
        }
        self.emit(QueueEvent::PassCompleted(report.clone()));
        PassOutcome::Completed(report)
    }

    async fn drain_tables(&self) -> PassReport {
        let tables = {
            let state = self.inner.state.lock().await;
            state.queue.pending_tables()
        };

        let mut report = PassReport::default();
        for table_report in join_all(tables.into_iter().map(|t| self.drain_table(t))).await {
            report.merge(table_report);
        }
        report
    }

    async fn drain_table(&self, table: TableName) -> PassReport {
        let mut report = PassReport::default();

        while self.is_online() {
            let (id, request) = match self.claim_next(&table).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(table = %table, error = %e, "could not claim entry");
                    report.errors.push(e.to_string());
                    break;
                }
            };

            report.submitted += 1;
            let outcome = self.inner.remote.apply(&request).await;

            let mut state = self.inner.state.lock().await;
            match self.settle(&mut state, id, &outcome).await {
                Ok(Disposition::Synced) => {
                    report.synced += 1;
                    tracing::debug!(entry_id = id, table = %table, ?outcome, "entry synced");
                }
                Ok(Disposition::Retry {
                    retry_count,
                    next_attempt_at,
                }) => {
                    report.retried += 1;
                    tracing::debug!(entry_id = id, table = %table, retry_count, next_attempt_at, "entry will retry");
                    break;
                }
                Ok(Disposition::Failed { retry_count, error }) => {
                    report.failed += 1;
                    tracing::warn!(entry_id = id, table = %table, retry_count, %error, "entry failed");
                    break;
                }
                Err(e) => {
                    tracing::error!(entry_id = id, table = %table, error = %e, "could not settle entry");
                    report.errors.push(e.to_string());
                    break;
                }
            }
            let summary = state.queue.summary();
            drop(state);
            self.emit(QueueEvent::Changed(summary));
        }

        report
    }

    /// Move the table's head to in flight, durably, and build its request.
    async fn claim_next(&self, table: &str) -> Result<Option<(EntryId, ApplyRequest)>> {
        let mut state = self.inner.state.lock().await;
        let Some(id) = state.queue.next_ready(table, now_ms()) else {
            return Ok(None);
        };
        state.queue.mark_in_flight(id)?;

        let entry = state.queue.get(id).cloned().ok_or(Error::EntryNotFound(id))?;
        if let Err(e) = storage::save_entry_state(&self.inner.pool, &entry).await {
            state.queue.reset_to_pending(id, entry.next_attempt_at)?;
            return Err(e);
        }
        Ok(Some((id, ApplyRequest::from(&entry))))
    }

    /// Fold an outcome into the queue and the local store.
    async fn settle(
        &self,
        state: &mut EngineState,
        id: EntryId,
        outcome: &RemoteOutcome,
    ) -> Result<Disposition> {
        let disposition = state
            .queue
            .settle(id, outcome, &self.inner.config.retry, now_ms())?;

        match &disposition {
            Disposition::Synced => {
                state.coordinator.commit(id);
                state.queue.remove(id)?;
                // A leftover row resubmits after restart and comes back already applied.
                storage::delete_entry(&self.inner.pool, id).await?;
            }
            Disposition::Retry { .. } | Disposition::Failed { .. } => {
                let entry = state.queue.get(id).ok_or(Error::EntryNotFound(id))?;
                storage::save_entry_state(&self.inner.pool, entry).await?;
            }
        }
        Ok(disposition)
    }
}
