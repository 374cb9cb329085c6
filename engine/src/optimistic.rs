//! Optimistic state and rollback.
//!
//! Every mutation is applied to [`LocalState`] the moment it is queued. Before
//! touching anything the [`OptimisticCoordinator`] captures a snapshot of each
//! object the mutation writes, keyed by entry id. The snapshot is dropped when
//! the entry syncs and restored when the operator discards it.
//!
//! Restoration is per object and guarded by revision: each write bumps a
//! monotonic revision, and an object is restored only if its current revision
//! is still the one this entry produced. Anything newer (a later local write,
//! or a server refresh) wins and the stale snapshot is skipped. Removals take
//! a revision too, kept as a tombstone, so one delete is never mistaken for
//! another.

use crate::{
    error::Result, EntryId, Error, Mutation, MutationMeta, OperationKind, RecordId, Revision,
    StockAdjustment, TableName, PRIMARY_KEY,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A record as the device currently sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    pub table: TableName,
    pub id: RecordId,
    /// Bumped on every local write
    pub revision: Revision,
    pub payload: Value,
}

/// A write to local state, as persisted to the read cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordChange {
    pub table: TableName,
    pub id: RecordId,
    /// `None` means the record is now absent
    pub record: Option<LocalRecord>,
}

/// Local view of every table the device has written or fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalState {
    tables: BTreeMap<TableName, BTreeMap<RecordId, LocalRecord>>,
    /// Revision of the removal that left each absent record absent
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    tombstones: BTreeMap<TableName, BTreeMap<RecordId, Revision>>,
    revision: Revision,
}

impl LocalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild state from persisted records.
    pub fn from_records(records: impl IntoIterator<Item = LocalRecord>) -> Self {
        let mut state = Self::new();
        for record in records {
            state.restore(record);
        }
        state
    }

    pub fn get(&self, table: &str, id: &str) -> Option<&LocalRecord> {
        self.tables.get(table)?.get(id)
    }

    /// Records of one table in id order.
    pub fn records(&self, table: &str) -> impl Iterator<Item = &LocalRecord> {
        self.tables.get(table).into_iter().flat_map(|t| t.values())
    }

    /// Total record count across tables.
    pub fn len(&self) -> usize {
        self.tables.values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest revision handed out.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Revision of the last write to a record, removals included.
    pub fn revision_of(&self, table: &str, id: &str) -> Option<Revision> {
        self.get(table, id).map(|r| r.revision).or_else(|| {
            self.tombstones
                .get(table)
                .and_then(|t| t.get(id))
                .copied()
        })
    }

    /// Write a payload under a fresh revision.
    pub fn put(&mut self, table: &str, id: &str, payload: Value) -> LocalRecord {
        self.revision += 1;
        let record = LocalRecord {
            table: table.to_string(),
            id: id.to_string(),
            revision: self.revision,
            payload,
        };
        self.clear_tombstone(table, id);
        self.tables
            .entry(record.table.clone())
            .or_default()
            .insert(record.id.clone(), record.clone());
        record
    }

    /// Remove a record under a fresh revision, present or not.
    pub fn remove(&mut self, table: &str, id: &str) -> Option<LocalRecord> {
        self.revision += 1;
        self.tombstones
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), self.revision);

        let records = self.tables.get_mut(table)?;
        let removed = records.remove(id);
        if records.is_empty() {
            self.tables.remove(table);
        }
        removed
    }

    /// Put back a record exactly as it was, revision included.
    pub fn restore(&mut self, record: LocalRecord) {
        self.revision = self.revision.max(record.revision);
        self.clear_tombstone(&record.table, &record.id);
        self.tables
            .entry(record.table.clone())
            .or_default()
            .insert(record.id.clone(), record);
    }

    /// Make a record absent again exactly as it was: no fresh revision, and
    /// the tombstone it had before, if any.
    pub fn restore_absent(&mut self, table: &str, id: &str, tombstone: Option<Revision>) {
        if let Some(records) = self.tables.get_mut(table) {
            records.remove(id);
            if records.is_empty() {
                self.tables.remove(table);
            }
        }
        match tombstone {
            Some(revision) => {
                self.tombstones
                    .entry(table.to_string())
                    .or_default()
                    .insert(id.to_string(), revision);
            }
            None => self.clear_tombstone(table, id),
        }
    }

    /// Drop every tombstone. Only safe once no snapshot can compare against one.
    pub fn forget_tombstones(&mut self) {
        self.tombstones.clear();
    }

    fn clear_tombstone(&mut self, table: &str, id: &str) {
        if let Some(tombstones) = self.tombstones.get_mut(table) {
            tombstones.remove(id);
            if tombstones.is_empty() {
                self.tombstones.remove(table);
            }
        }
    }
}

/// What an optimistic application wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedState {
    pub entry_id: EntryId,
    pub changes: Vec<RecordChange>,
}

/// What a revert restored.
#[derive(Debug, Clone, PartialEq)]
pub struct RevertReport {
    pub entry_id: EntryId,
    pub restored: Vec<RecordChange>,
    /// Objects left alone because something newer touched them
    pub superseded: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct SnapshotObject {
    table: TableName,
    id: RecordId,
    previous: Option<LocalRecord>,
    /// Tombstone revision when the object was absent before this entry
    previous_tombstone: Option<Revision>,
    /// Revision this entry left behind, a tombstone's if it deleted the object
    applied_revision: Revision,
}

#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    objects: Vec<SnapshotObject>,
}

/// Applies mutations to [`LocalState`] and owns their rollback snapshots.
#[derive(Debug, Clone, Default)]
pub struct OptimisticCoordinator {
    state: LocalState,
    snapshots: BTreeMap<EntryId, Snapshot>,
}

impl OptimisticCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously persisted state; no snapshots survive a restart.
    pub fn with_state(state: LocalState) -> Self {
        Self {
            state,
            snapshots: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> &LocalState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut LocalState {
        &mut self.state
    }

    pub fn has_snapshot(&self, entry_id: EntryId) -> bool {
        self.snapshots.contains_key(&entry_id)
    }

    /// Snapshots still waiting for a commit or revert.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Apply a mutation's effects and snapshot what it overwrote.
    ///
    /// Either every effect lands or none does.
    pub fn apply(&mut self, entry_id: EntryId, mutation: &Mutation) -> Result<AppliedState> {
        if self.snapshots.contains_key(&entry_id) {
            return Err(Error::SnapshotExists(entry_id));
        }

        let mut staging = Staging::new(&self.state);
        staging.stage(mutation)?;
        let Staging {
            mut values, order, ..
        } = staging;

        let mut objects = Vec::with_capacity(order.len());
        let mut changes = Vec::with_capacity(order.len());
        for (table, id) in order {
            let previous = self.state.get(&table, &id).cloned();
            let previous_tombstone = match previous {
                Some(_) => None,
                None => self.state.revision_of(&table, &id),
            };
            let record = match values.remove(&(table.clone(), id.clone())).flatten() {
                Some(payload) => Some(self.state.put(&table, &id, payload)),
                None => {
                    self.state.remove(&table, &id);
                    None
                }
            };
            objects.push(SnapshotObject {
                table: table.clone(),
                id: id.clone(),
                previous,
                previous_tombstone,
                applied_revision: self.state.revision(),
            });
            changes.push(RecordChange { table, id, record });
        }

        self.snapshots.insert(entry_id, Snapshot { objects });
        Ok(AppliedState { entry_id, changes })
    }

    /// Drop the snapshot of a synced entry. Returns whether one existed.
    pub fn commit(&mut self, entry_id: EntryId) -> bool {
        let existed = self.snapshots.remove(&entry_id).is_some();
        self.prune_tombstones();
        existed
    }

    /// Undo an entry's effects where nothing newer has landed.
    ///
    /// Returns `None` when no snapshot exists, so a second revert is a no-op.
    pub fn revert(&mut self, entry_id: EntryId) -> Option<RevertReport> {
        let snapshot = self.snapshots.remove(&entry_id)?;
        let mut report = RevertReport {
            entry_id,
            restored: Vec::new(),
            superseded: 0,
        };

        for object in snapshot.objects.into_iter().rev() {
            let current = self.state.revision_of(&object.table, &object.id);
            if current != Some(object.applied_revision) {
                report.superseded += 1;
                continue;
            }
            match object.previous {
                Some(previous) => self.state.restore(previous),
                None => {
                    self.state
                        .restore_absent(&object.table, &object.id, object.previous_tombstone)
                }
            }
            report.restored.push(RecordChange {
                record: self.state.get(&object.table, &object.id).cloned(),
                table: object.table,
                id: object.id,
            });
        }

        self.prune_tombstones();
        Some(report)
    }

    pub(crate) fn prune_tombstones(&mut self) {
        if self.snapshots.is_empty() {
            self.state.forget_tombstones();
        }
    }
}

/// Effects of one mutation, computed before anything is written.
struct Staging<'a> {
    state: &'a LocalState,
    values: BTreeMap<(TableName, RecordId), Option<Value>>,
    order: Vec<(TableName, RecordId)>,
}

impl<'a> Staging<'a> {
    fn new(state: &'a LocalState) -> Self {
        Self {
            state,
            values: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    fn current(&self, table: &str, id: &str) -> Option<Value> {
        match self.values.get(&(table.to_string(), id.to_string())) {
            Some(staged) => staged.clone(),
            None => self.state.get(table, id).map(|r| r.payload.clone()),
        }
    }

    fn set(&mut self, table: &str, id: &str, value: Option<Value>) {
        let key = (table.to_string(), id.to_string());
        if !self.values.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.values.insert(key, value);
    }

    fn stage(&mut self, mutation: &Mutation) -> Result<()> {
        let table = mutation.table.as_str();
        let id = primary_key(table, &mutation.payload)?;

        match (&mutation.operation, &mutation.meta) {
            (OperationKind::Insert, _) => {
                self.set(table, &id, Some(Value::Object(object(&mutation.payload)?.clone())));
            }
            (OperationKind::Update, MutationMeta::Adjust(adjustment)) => {
                self.adjust(adjustment)?;
            }
            (OperationKind::Update, _) => {
                let mut merged = match self.current(table, &id) {
                    Some(Value::Object(existing)) => existing,
                    _ => Map::new(),
                };
                for (field, value) in object(&mutation.payload)? {
                    merged.insert(field.clone(), value.clone());
                }
                self.set(table, &id, Some(Value::Object(merged)));
            }
            (OperationKind::Delete, _) => self.set(table, &id, None),
            (OperationKind::Compound, MutationMeta::SessionUsage { deductions }) => {
                self.set(table, &id, Some(Value::Object(object(&mutation.payload)?.clone())));
                for adjustment in deductions {
                    self.adjust(adjustment)?;
                }
            }
            (
                OperationKind::Compound,
                MutationMeta::OrderPlacement {
                    line_table,
                    lines,
                    deductions,
                },
            ) => {
                self.set(table, &id, Some(Value::Object(object(&mutation.payload)?.clone())));
                for line in lines {
                    let line_id = primary_key(line_table, line)?;
                    self.set(line_table, &line_id, Some(Value::Object(object(line)?.clone())));
                }
                for adjustment in deductions {
                    self.adjust(adjustment)?;
                }
            }
            (OperationKind::Compound, _) => {
                return Err(Error::InvalidMeta {
                    operation: OperationKind::Compound,
                    reason: "compound requires a compound side-payload".into(),
                });
            }
        }
        Ok(())
    }

    /// Apply a counter delta if the record is known locally.
    fn adjust(&mut self, adjustment: &StockAdjustment) -> Result<()> {
        let Some(Value::Object(mut record)) =
            self.current(&adjustment.table, &adjustment.record_id)
        else {
            return Ok(());
        };
        let Some(current) = record.get(&adjustment.field) else {
            return Ok(());
        };
        let current = current.as_i64().ok_or_else(|| Error::NotACounter {
            table: adjustment.table.clone(),
            field: adjustment.field.clone(),
        })?;
        record.insert(
            adjustment.field.clone(),
            Value::from(current.saturating_add(adjustment.delta)),
        );
        self.set(
            &adjustment.table,
            &adjustment.record_id,
            Some(Value::Object(record)),
        );
        Ok(())
    }
}

fn primary_key(table: &str, payload: &Value) -> Result<RecordId> {
    payload
        .get(PRIMARY_KEY)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::MissingPrimaryKey {
            table: table.to_string(),
            field: PRIMARY_KEY.to_string(),
        })
}

fn object(payload: &Value) -> Result<&Map<String, Value>> {
    payload
        .as_object()
        .ok_or_else(|| Error::InvalidPayload("payload must be an object".into()))
}
