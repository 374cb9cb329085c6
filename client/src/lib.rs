//! # Ferry Client
//!
//! The device-side runtime of Ferry: it keeps a business application writing
//! while offline and replays those writes against the remote store once
//! connectivity returns.
//!
//! ## Components
//!
//! - **Local durable store**: SQLite via `sqlx`, holding the mutation queue
//!   and a read cache of server data ([`storage`])
//! - **Sync engine**: [`SyncEngine`] applies each write optimistically and
//!   enqueues it in the same transaction
//! - **Dispatcher**: [`SyncEngine::run_pass`] drains ready entries per table
//!   in id order, single-flight
//! - **Reconciliation trigger**: [`ReconciliationTrigger`] turns connectivity,
//!   enqueue and discard signals into passes and view refreshes
//! - **Inspection surface**: counts, entry details, `retry_one`,
//!   `discard_one` and `discard_all` on [`SyncEngine`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use ferry_client::{ClientConfig, ReconciliationTrigger, SyncEngine};
//! use ferry_engine::{FieldDef, FieldType, Mutation, Schema, StockAdjustment, TableSchema};
//! use serde_json::json;
//!
//! # async fn example() -> ferry_client::Result<()> {
//! let schema = Schema::new(1)
//!     .with_table(TableSchema::new(
//!         "sessions",
//!         vec![FieldDef::required("grams", FieldType::Int)],
//!     ))
//!     .with_table(
//!         TableSchema::new(
//!             "inventory",
//!             vec![FieldDef::required("quantity", FieldType::Int)],
//!         )
//!         .with_counter("quantity"),
//!     );
//!
//! let config = ClientConfig::from_env()?;
//! let engine = SyncEngine::connect(config, schema).await?;
//! let trigger = ReconciliationTrigger::spawn(&engine);
//!
//! engine
//!     .enqueue_mutation(
//!         "staff-1",
//!         Mutation::session_usage(
//!             "sessions",
//!             json!({"id": "s-1", "grams": 20}),
//!             vec![StockAdjustment::decrement("inventory", "beans", "quantity", 20)],
//!         ),
//!     )
//!     .await?;
//!
//! println!("{:?}", engine.summary().await);
//! if let Some(trigger) = trigger {
//!     trigger.stop().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod inspect;
pub mod remote;
pub mod storage;
pub mod trigger;

pub use config::{ClientConfig, ConfigError};
pub use dispatcher::PassOutcome;
pub use engine::SyncEngine;
pub use error::{ClientError, Result};
pub use events::{ConnectivitySignal, PassReport, QueueEvent};
pub use inspect::EntryView;
pub use remote::{HttpRemote, RemoteStore};
pub use trigger::ReconciliationTrigger;
