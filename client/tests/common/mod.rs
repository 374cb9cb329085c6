//! Shared fixtures for client integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use ferry_client::{ClientConfig, ClientError, RemoteStore, SyncEngine};
use ferry_engine::{
    ApplyRequest, FieldDef, FieldType, IdempotencyKey, Mutation, MutationMeta, OperationKind,
    RemoteOutcome, RetryPolicy, Schema, StockAdjustment, TableSchema,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted misbehaviour for the next submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Never reaches the store
    Unavailable,
    /// Refused by a business rule
    Reject(String),
    /// Commits, but the acknowledgement is lost
    LoseAck,
    /// The primary write lands, then the call dies before the side-steps;
    /// the store rolls everything back
    FailMidway,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub table: String,
    pub record_id: String,
    pub key: IdempotencyKey,
}

#[derive(Default)]
struct RemoteState {
    ledger: HashSet<IdempotencyKey>,
    records: BTreeMap<(String, String), Value>,
    faults: VecDeque<Fault>,
    submissions: Vec<Submission>,
    commits: usize,
}

/// In-process remote store honouring the apply contract: replayed keys come
/// back already applied, every entry commits as a unit, counters move by
/// delta and never below zero.
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<RemoteState>,
    delay: Option<Duration>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn seed(&self, table: &str, record: Value) {
        let id = record["id"].as_str().unwrap_or_default().to_string();
        self.state
            .lock()
            .unwrap()
            .records
            .insert((table.to_string(), id), record);
    }

    pub fn fail_next(&self, fault: Fault) {
        self.state.lock().unwrap().faults.push_back(fault);
    }

    pub fn record(&self, table: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(&(table.to_string(), id.to_string()))
            .cloned()
    }

    pub fn quantity(&self, id: &str) -> Option<i64> {
        self.record("inventory", id)
            .and_then(|r| r["quantity"].as_i64())
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().submissions.clone()
    }

    /// Entries committed, counting each idempotency key once.
    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn apply(&self, request: &ApplyRequest) -> RemoteOutcome {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.submissions.push(Submission {
            table: request.table.clone(),
            record_id: request.payload["id"].as_str().unwrap_or_default().to_string(),
            key: request.idempotency_key.clone(),
        });

        let fault = state.faults.pop_front();
        match &fault {
            Some(Fault::Unavailable) => return RemoteOutcome::Unavailable("connection reset".into()),
            Some(Fault::Reject(reason)) => return RemoteOutcome::Rejected(reason.clone()),
            _ => {}
        }

        if state.ledger.contains(&request.idempotency_key) {
            return RemoteOutcome::AlreadyApplied;
        }

        let mut staged = state.records.clone();
        if fault == Some(Fault::FailMidway) {
            let _ = write_primary(&mut staged, &request.mutation());
            return RemoteOutcome::Unavailable("server crashed mid-transaction".into());
        }
        if let Err(reason) = apply_mutation(&mut staged, &request.mutation()) {
            return RemoteOutcome::Rejected(reason);
        }

        state.records = staged;
        state.ledger.insert(request.idempotency_key.clone());
        state.commits += 1;

        if fault == Some(Fault::LoseAck) {
            return RemoteOutcome::Unavailable("acknowledgement lost".into());
        }
        RemoteOutcome::Applied
    }

    async fn fetch(&self, table: &str) -> Result<Vec<Value>, ClientError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .iter()
            .filter(|((t, _), _)| t == table)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

type Records = BTreeMap<(String, String), Value>;

fn key(table: &str, payload: &Value) -> Result<(String, String), String> {
    payload["id"]
        .as_str()
        .map(|id| (table.to_string(), id.to_string()))
        .ok_or_else(|| "missing id".to_string())
}

fn insert(records: &mut Records, table: &str, payload: &Value) -> Result<(), String> {
    let key = key(table, payload)?;
    if records.contains_key(&key) {
        return Err(format!("{}/{} already exists", key.0, key.1));
    }
    records.insert(key, payload.clone());
    Ok(())
}

fn adjust(records: &mut Records, adjustment: &StockAdjustment) -> Result<(), String> {
    let key = (adjustment.table.clone(), adjustment.record_id.clone());
    let record = records
        .get_mut(&key)
        .ok_or_else(|| format!("{}/{} not found", key.0, key.1))?;
    let current = record[&adjustment.field].as_i64().unwrap_or(0);
    let next = current + adjustment.delta;
    if next < 0 {
        return Err(format!("Insufficient stock for {}", adjustment.record_id));
    }
    record[&adjustment.field] = json!(next);
    Ok(())
}

fn write_primary(records: &mut Records, mutation: &Mutation) -> Result<(), String> {
    let table = mutation.table.as_str();
    match (mutation.operation, &mutation.meta) {
        (OperationKind::Insert | OperationKind::Compound, _) => {
            insert(records, table, &mutation.payload)
        }
        (OperationKind::Update, MutationMeta::Adjust(adjustment)) => adjust(records, adjustment),
        (OperationKind::Update, _) => {
            let key = key(table, &mutation.payload)?;
            let record = records
                .get_mut(&key)
                .ok_or_else(|| format!("{}/{} not found", key.0, key.1))?;
            if let (Some(target), Some(patch)) = (record.as_object_mut(), mutation.payload.as_object())
            {
                for (field, value) in patch {
                    target.insert(field.clone(), value.clone());
                }
            }
            Ok(())
        }
        (OperationKind::Delete, _) => {
            let key = key(table, &mutation.payload)?;
            records.remove(&key);
            Ok(())
        }
    }
}

/// Primary write, then lines, then deductions.
fn apply_mutation(records: &mut Records, mutation: &Mutation) -> Result<(), String> {
    write_primary(records, mutation)?;
    match &mutation.meta {
        MutationMeta::None | MutationMeta::Adjust(_) => Ok(()),
        MutationMeta::SessionUsage { deductions } => {
            deductions.iter().try_for_each(|d| adjust(records, d))
        }
        MutationMeta::OrderPlacement {
            line_table,
            lines,
            deductions,
        } => {
            for line in lines {
                insert(records, line_table, line)?;
            }
            deductions.iter().try_for_each(|d| adjust(records, d))
        }
    }
}

pub fn schema() -> Schema {
    Schema::new(1)
        .with_table(TableSchema::new(
            "sessions",
            vec![
                FieldDef::required("grams", FieldType::Int),
                FieldDef::optional("note", FieldType::String),
            ],
        ))
        .with_table(
            TableSchema::new(
                "inventory",
                vec![
                    FieldDef::required("name", FieldType::String),
                    FieldDef::required("quantity", FieldType::Int),
                ],
            )
            .with_counter("quantity"),
        )
        .with_table(TableSchema::new(
            "orders",
            vec![FieldDef::required("total", FieldType::Int)],
        ))
        .with_table(TableSchema::new(
            "order_lines",
            vec![
                FieldDef::required("order_id", FieldType::String),
                FieldDef::required("quantity", FieldType::Int),
            ],
        ))
}

/// In-memory store, three attempts, no backoff, short settle delay.
pub fn config() -> ClientConfig {
    ClientConfig::new("sqlite::memory:")
        .with_retry(RetryPolicy::new(3, 0, 0))
        .with_settle_delay(Duration::from_millis(50))
}

pub async fn open(remote: &Arc<MockRemote>) -> SyncEngine {
    open_with(config(), remote).await
}

pub async fn open_with(config: ClientConfig, remote: &Arc<MockRemote>) -> SyncEngine {
    SyncEngine::open(config, schema(), remote.clone())
        .await
        .expect("engine opens")
}

/// Seed an inventory item remotely and pull it into the device.
pub async fn stock(engine: &SyncEngine, remote: &MockRemote, id: &str, quantity: i64) {
    remote.seed("inventory", json!({"id": id, "name": id, "quantity": quantity}));
    engine.refresh_table("inventory").await.expect("refresh");
}

pub fn session(id: &str, grams: i64, item: &str) -> Mutation {
    Mutation::session_usage(
        "sessions",
        json!({"id": id, "grams": grams}),
        vec![StockAdjustment::decrement("inventory", item, "quantity", grams)],
    )
}

pub fn note(id: &str, text: &str) -> Mutation {
    Mutation::update("sessions", json!({"id": id, "note": text}))
}

pub async fn local_quantity(engine: &SyncEngine, id: &str) -> Option<i64> {
    engine
        .record("inventory", id)
        .await
        .and_then(|r| r["quantity"].as_i64())
}
