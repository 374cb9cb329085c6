//! # Ferry Engine
//!
//! The core of an offline-capable mutation queue.
//!
//! Every write a device wants to make is expressed as a [`Mutation`], applied
//! optimistically to local state, and recorded as a [`QueueEntry`] that is
//! replayed against the remote store once connectivity allows. This crate holds
//! the pure logic for that lifecycle; the async runtime, durable storage and
//! network transport live in `ferry-client`.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches files, sockets or clocks; callers
//!   pass timestamps in
//! - **At most one effective application**: every entry carries an
//!   [`IdempotencyKey`] fixed at enqueue time, so the remote can turn a
//!   replay into "already applied" instead of a second write
//! - **Per-table FIFO**: entries for one table are handed out strictly in
//!   ascending id order
//! - **Safe rollback**: the [`OptimisticCoordinator`] only restores a snapshot
//!   when nothing newer has touched the same object
//!
//! ## Core Concepts
//!
//! ### Mutations
//!
//! A [`Mutation`] targets one table with an [`OperationKind`]
//! (`insert`, `update`, `delete`, `compound`) and a primary payload.
//! Side-payloads live in [`MutationMeta`], a tagged enum with one variant per
//! compound shape so replay logic is matched exhaustively.
//!
//! ### Queue
//!
//! The [`MutationQueue`] owns entry status transitions:
//!
//! ```text
//! pending -> in_flight -> { synced | pending (retry) | failed }
//! ```
//!
//! [`MutationQueue::settle`] folds a [`RemoteOutcome`] into the next state using
//! the [`RetryPolicy`].
//!
//! ## Quick Start
//!
//! ```rust
//! use ferry_engine::{
//!     FieldDef, FieldType, IdempotencyKey, Mutation, MutationQueue, OptimisticCoordinator,
//!     RemoteOutcome, RetryPolicy, Schema, TableSchema,
//! };
//! use serde_json::json;
//!
//! // 1. Describe the tables the device writes to
//! let schema = Schema::new(1).with_table(TableSchema::new(
//!     "sessions",
//!     vec![
//!         FieldDef::required("id", FieldType::String),
//!         FieldDef::required("grams", FieldType::Int),
//!     ],
//! ));
//!
//! // 2. Validate, enqueue and apply optimistically
//! let mutation = Mutation::insert("sessions", json!({"id": "s-1", "grams": 20}));
//! schema.validate_mutation(&mutation).unwrap();
//!
//! let mut queue = MutationQueue::new();
//! let mut coordinator = OptimisticCoordinator::new();
//!
//! let id = queue
//!     .enqueue(mutation.clone(), "user-1", IdempotencyKey::generate(), 1_000)
//!     .unwrap();
//! coordinator.apply(id, &mutation).unwrap();
//! assert!(coordinator.state().get("sessions", "s-1").is_some());
//!
//! // 3. Hand the entry to the remote and settle the outcome
//! let next = queue.next_ready("sessions", 1_000).unwrap();
//! queue.mark_in_flight(next).unwrap();
//! queue
//!     .settle(next, &RemoteOutcome::Applied, &RetryPolicy::default(), 1_050)
//!     .unwrap();
//! coordinator.commit(next);
//! queue.remove(next).unwrap();
//!
//! assert_eq!(queue.summary().total, 0);
//! ```

pub mod entry;
pub mod error;
pub mod idempotency;
pub mod mutation;
pub mod optimistic;
pub mod protocol;
pub mod queue;
pub mod reconcile;
pub mod retry;
pub mod schema;

// Re-export main types at crate root
pub use entry::{EntryStatus, QueueEntry};
pub use error::Error;
pub use idempotency::IdempotencyKey;
pub use mutation::{Mutation, MutationMeta, OperationKind, StockAdjustment};
pub use optimistic::{
    AppliedState, LocalRecord, LocalState, OptimisticCoordinator, RecordChange, RevertReport,
};
pub use protocol::{ApplyRequest, ApplyResponse, FetchResponse, RemoteOutcome};
pub use queue::{Disposition, MutationQueue, QueueSummary};
pub use reconcile::{ReconcileReport, Reconciler};
pub use retry::RetryPolicy;
pub use schema::{FieldDef, FieldType, Schema, TableSchema, PRIMARY_KEY};

/// Type aliases for clarity
pub type EntryId = u64;
pub type TableName = String;
pub type RecordId = String;
pub type UserId = String;
pub type Timestamp = u64;
pub type Revision = u64;
pub type SchemaVersion = u32;
