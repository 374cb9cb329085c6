//! Mutation queue - the ordered set of intended writes.
//!
//! The queue is the single owner of entry status. It hands out work per table
//! in ascending id order and folds remote outcomes into the next status:
//!
//! ```text
//! pending -> in_flight -> synced            (applied / already applied)
//!                      -> pending (retry)   (transient, under the ceiling)
//!                      -> failed            (rejected, or ceiling reached)
//! ```
//!
//! The durable copy lives in the client's local store; this type is the
//! in-memory mirror that all decisions are made against.

use crate::{
    error::Result, EntryId, EntryStatus, Error, IdempotencyKey, Mutation, QueueEntry, RecordId,
    RemoteOutcome, RetryPolicy, TableName, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Aggregate counts for the inspection surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub pending: usize,
    pub in_flight: usize,
    pub failed: usize,
    pub total: usize,
}

/// Where an entry went after a remote attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Committed remotely; drop the snapshot and prune the entry
    Synced,
    /// Transient failure; back to pending until `next_attempt_at`
    Retry {
        retry_count: u32,
        next_attempt_at: Timestamp,
    },
    /// Needs an operator decision
    Failed { retry_count: u32, error: String },
}

/// Ordered queue of entries keyed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationQueue {
    entries: BTreeMap<EntryId, QueueEntry>,
    /// Highest id ever issued, so pruned ids are never reused
    last_id: EntryId,
}

impl MutationQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the queue from persisted entries, in any order.
    ///
    /// Entries left `in_flight` by a crash go back to `pending`: the attempt's
    /// outcome is unknown and the idempotency key makes resubmission safe.
    pub fn restore(entries: impl IntoIterator<Item = QueueEntry>) -> Self {
        let mut queue = Self::new();
        for mut entry in entries {
            if entry.status == EntryStatus::InFlight {
                entry.status = EntryStatus::Pending;
            }
            queue.last_id = queue.last_id.max(entry.id);
            queue.entries.insert(entry.id, entry);
        }
        queue
    }

    /// Highest id issued so far.
    pub fn last_id(&self) -> EntryId {
        self.last_id
    }

    /// Queue a mutation under the next local id.
    pub fn enqueue(
        &mut self,
        mutation: Mutation,
        user_id: impl Into<UserId>,
        idempotency_key: IdempotencyKey,
        now: Timestamp,
    ) -> Result<EntryId> {
        let id = self.last_id + 1;
        self.insert(QueueEntry::new(id, mutation, user_id, idempotency_key, now))?;
        Ok(id)
    }

    /// Insert an entry whose id was assigned elsewhere (e.g. by durable storage).
    pub fn insert(&mut self, entry: QueueEntry) -> Result<()> {
        self.check_insert(&entry)?;
        self.last_id = entry.id;
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    /// Whether [`insert`](Self::insert) would accept `entry`.
    pub fn check_insert(&self, entry: &QueueEntry) -> Result<()> {
        if entry.id <= self.last_id {
            return Err(Error::NonMonotonicId {
                id: entry.id,
                last: self.last_id,
            });
        }
        if self
            .entries
            .values()
            .any(|e| e.idempotency_key == entry.idempotency_key)
        {
            return Err(Error::DuplicateIdempotencyKey(
                entry.idempotency_key.to_string(),
            ));
        }
        Ok(())
    }

    pub fn get(&self, id: EntryId) -> Option<&QueueEntry> {
        self.entries.get(&id)
    }

    /// All entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids with the given status, ascending.
    pub fn list_by_status(&self, status: EntryStatus) -> Vec<EntryId> {
        self.entries
            .values()
            .filter(|e| e.status == status)
            .map(|e| e.id)
            .collect()
    }

    pub fn summary(&self) -> QueueSummary {
        let mut summary = QueueSummary::default();
        for entry in self.entries.values() {
            match entry.status {
                EntryStatus::Pending => summary.pending += 1,
                EntryStatus::InFlight => summary.in_flight += 1,
                EntryStatus::Failed => summary.failed += 1,
                EntryStatus::Synced => {}
            }
        }
        summary.total = summary.pending + summary.in_flight + summary.failed;
        summary
    }

    /// Tables with at least one pending entry.
    pub fn pending_tables(&self) -> BTreeSet<TableName> {
        self.entries
            .values()
            .filter(|e| e.status == EntryStatus::Pending)
            .map(|e| e.table.clone())
            .collect()
    }

    /// Oldest entry of a table that has not synced yet.
    ///
    /// Everything behind it waits: a failed or backing-off head blocks its
    /// table so later entries can never overtake it.
    pub fn head(&self, table: &str) -> Option<&QueueEntry> {
        self.entries
            .values()
            .find(|e| e.table == table && e.status != EntryStatus::Synced)
    }

    /// The entry a dispatcher should submit next for `table`, if any.
    pub fn next_ready(&self, table: &str, now: Timestamp) -> Option<EntryId> {
        self.head(table)
            .filter(|e| e.is_ready(now))
            .map(|e| e.id)
    }

    /// Earliest time a backing-off table head becomes ready.
    ///
    /// Only heads count: an entry behind a failed or in-flight head cannot go
    /// out before it, whatever its own schedule.
    pub fn next_retry_at(&self) -> Option<Timestamp> {
        self.pending_tables()
            .iter()
            .filter_map(|table| self.head(table))
            .filter(|e| e.status == EntryStatus::Pending)
            .map(|e| e.next_attempt_at)
            .min()
    }

    /// `pending -> in_flight`. Returns whether the status changed.
    pub fn mark_in_flight(&mut self, id: EntryId) -> Result<bool> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Ok(false);
        };
        match entry.status {
            EntryStatus::Pending => {
                entry.status = EntryStatus::InFlight;
                Ok(true)
            }
            EntryStatus::InFlight => Ok(false),
            from => Err(Error::InvalidTransition {
                id,
                from,
                to: EntryStatus::InFlight,
            }),
        }
    }

    /// Mark an entry synced. No-op when absent or already synced.
    pub fn mark_synced(&mut self, id: EntryId) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.status != EntryStatus::Synced => {
                entry.status = EntryStatus::Synced;
                entry.error = None;
                true
            }
            _ => false,
        }
    }

    /// Mark an entry failed with a human-readable error.
    pub fn mark_failed(&mut self, id: EntryId, error: impl Into<String>) -> Result<bool> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Ok(false);
        };
        if entry.status == EntryStatus::Synced {
            return Err(Error::InvalidTransition {
                id,
                from: EntryStatus::Synced,
                to: EntryStatus::Failed,
            });
        }
        let changed = entry.status != EntryStatus::Failed;
        entry.status = EntryStatus::Failed;
        entry.error = Some(error.into());
        Ok(changed)
    }

    /// Put an entry back to pending, eligible from `next_attempt_at`.
    pub fn reset_to_pending(&mut self, id: EntryId, next_attempt_at: Timestamp) -> Result<bool> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Ok(false);
        };
        match entry.status {
            EntryStatus::Synced => Err(Error::InvalidTransition {
                id,
                from: EntryStatus::Synced,
                to: EntryStatus::Pending,
            }),
            EntryStatus::Pending => {
                entry.next_attempt_at = next_attempt_at;
                Ok(false)
            }
            EntryStatus::InFlight | EntryStatus::Failed => {
                entry.status = EntryStatus::Pending;
                entry.error = None;
                entry.next_attempt_at = next_attempt_at;
                Ok(true)
            }
        }
    }

    /// Operator retry: a failed entry gets a fresh attempt budget, a pending one
    /// skips its backoff. In-flight and synced entries are left alone.
    pub fn retry_now(&mut self, id: EntryId, now: Timestamp) -> Result<bool> {
        match self.entries.get(&id).map(|e| e.status) {
            Some(EntryStatus::Failed) => {
                self.reset_to_pending(id, now)?;
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.retry_count = 0;
                }
                Ok(true)
            }
            Some(EntryStatus::Pending) => {
                self.reset_to_pending(id, now)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Fold the outcome of a remote attempt into the entry's status.
    pub fn settle(
        &mut self,
        id: EntryId,
        outcome: &RemoteOutcome,
        policy: &RetryPolicy,
        now: Timestamp,
    ) -> Result<Disposition> {
        let entry = self.entries.get_mut(&id).ok_or(Error::EntryNotFound(id))?;

        let disposition = match outcome {
            RemoteOutcome::Applied | RemoteOutcome::AlreadyApplied => Disposition::Synced,
            RemoteOutcome::Rejected(reason) => Disposition::Failed {
                retry_count: entry.retry_count + 1,
                error: reason.clone(),
            },
            RemoteOutcome::Unavailable(reason) => {
                let attempts = entry.retry_count + 1;
                if policy.is_exhausted(attempts) {
                    Disposition::Failed {
                        retry_count: attempts,
                        error: format!("gave up after {attempts} attempts: {reason}"),
                    }
                } else {
                    Disposition::Retry {
                        retry_count: attempts,
                        next_attempt_at: policy.next_attempt_at(attempts, now),
                    }
                }
            }
        };

        if entry.status != EntryStatus::InFlight {
            let to = match disposition {
                Disposition::Synced => EntryStatus::Synced,
                Disposition::Retry { .. } => EntryStatus::Pending,
                Disposition::Failed { .. } => EntryStatus::Failed,
            };
            return Err(Error::InvalidTransition {
                id,
                from: entry.status,
                to,
            });
        }

        match &disposition {
            Disposition::Synced => {
                entry.retry_count += 1;
                entry.status = EntryStatus::Synced;
                entry.error = None;
            }
            Disposition::Retry {
                retry_count,
                next_attempt_at,
            } => {
                entry.retry_count = *retry_count;
                entry.status = EntryStatus::Pending;
                entry.next_attempt_at = *next_attempt_at;
                entry.error = None;
            }
            Disposition::Failed { retry_count, error } => {
                entry.retry_count = *retry_count;
                entry.status = EntryStatus::Failed;
                entry.error = Some(error.clone());
            }
        }

        Ok(disposition)
    }

    /// Delete a synced or failed entry. Absent ids are a no-op.
    pub fn remove(&mut self, id: EntryId) -> Result<Option<QueueEntry>> {
        match self.entries.get(&id).map(|e| e.status) {
            None => Ok(None),
            Some(status @ (EntryStatus::Pending | EntryStatus::InFlight)) => {
                Err(Error::NotRemovable { id, status })
            }
            Some(_) => Ok(self.entries.remove(&id)),
        }
    }

    /// Records written by entries the engine still owns.
    ///
    /// A server refresh must not overwrite these, or the optimistic effect
    /// would flicker away until the entry syncs.
    pub fn outstanding_records(&self) -> HashSet<(TableName, RecordId)> {
        self.entries
            .values()
            .filter(|e| e.is_outstanding())
            .flat_map(|e| e.mutation().touched_records())
            .collect()
    }
}
