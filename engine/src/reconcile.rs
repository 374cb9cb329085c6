//! Reconciliation of local state against the authoritative store.
//!
//! A refetch replaces the local view of a table with what the remote holds,
//! except for records still written by an outstanding entry: those keep their
//! optimistic value until the entry settles, otherwise the UI would flicker
//! back to the pre-mutation value and forward again once it syncs.
//!
//! # Algorithm
//!
//! 1. Index the server records of the table by primary key
//! 2. For every server record: skip if protected, skip if the payload is
//!    unchanged, otherwise write it under a fresh revision
//! 3. Remove unprotected local records the server no longer has
//!
//! A fresh revision supersedes every older snapshot of that object, so a later
//! rollback cannot clobber server truth.

use crate::{
    error::Result, Error, LocalState, OptimisticCoordinator, RecordChange, RecordId, TableName,
    PRIMARY_KEY,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Outcome of reconciling one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub table: TableName,
    /// Records overwritten or added from the server
    pub replaced: usize,
    /// Server records ignored because an outstanding entry owns them
    pub kept_local: usize,
    /// Local records the server no longer has
    pub removed: usize,
    /// Writes to persist to the read cache
    #[serde(skip)]
    pub changes: Vec<RecordChange>,
}

/// Merges authoritative records into local state.
pub struct Reconciler<'a> {
    /// `(table, id)` pairs written by pending or in-flight entries
    protected: &'a HashSet<(TableName, RecordId)>,
}

impl<'a> Reconciler<'a> {
    pub fn new(protected: &'a HashSet<(TableName, RecordId)>) -> Self {
        Self { protected }
    }

    fn is_protected(&self, table: &str, id: &str) -> bool {
        self.protected
            .contains(&(table.to_string(), id.to_string()))
    }

    /// Replace the local view of `table` with `records`.
    ///
    /// Fails without touching state if any record lacks a string primary key.
    pub fn reconcile(
        &self,
        state: &mut LocalState,
        table: &str,
        records: Vec<Value>,
    ) -> Result<ReconcileReport> {
        let mut incoming: BTreeMap<RecordId, Value> = BTreeMap::new();
        for record in records {
            let id = record
                .get(PRIMARY_KEY)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| Error::MissingPrimaryKey {
                    table: table.to_string(),
                    field: PRIMARY_KEY.to_string(),
                })?;
            incoming.insert(id, record);
        }

        let mut report = ReconcileReport {
            table: table.to_string(),
            ..Default::default()
        };

        let stale: Vec<RecordId> = state
            .records(table)
            .filter(|r| !incoming.contains_key(&r.id))
            .map(|r| r.id.clone())
            .collect();

        for (id, payload) in incoming {
            if self.is_protected(table, &id) {
                report.kept_local += 1;
                continue;
            }
            if state.get(table, &id).map(|r| &r.payload) == Some(&payload) {
                continue;
            }
            let record = state.put(table, &id, payload);
            report.replaced += 1;
            report.changes.push(RecordChange {
                table: table.to_string(),
                id,
                record: Some(record),
            });
        }

        for id in stale {
            if self.is_protected(table, &id) {
                report.kept_local += 1;
                continue;
            }
            state.remove(table, &id);
            report.removed += 1;
            report.changes.push(RecordChange {
                table: table.to_string(),
                id,
                record: None,
            });
        }

        Ok(report)
    }
}

impl OptimisticCoordinator {
    /// Reconcile one table of this coordinator's state.
    pub fn reconcile_table(
        &mut self,
        table: &str,
        records: Vec<Value>,
        protected: &HashSet<(TableName, RecordId)>,
    ) -> Result<ReconcileReport> {
        let report = Reconciler::new(protected).reconcile(self.state_mut(), table, records)?;
        self.prune_tombstones();
        Ok(report)
    }
}
