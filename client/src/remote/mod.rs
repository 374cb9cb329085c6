//! The authoritative store, as seen from the device.

mod http;

pub use http::HttpRemote;

use crate::error::Result;
use async_trait::async_trait;
use ferry_engine::{ApplyRequest, RemoteOutcome};
use serde_json::Value;

/// Remote store contract.
///
/// `apply` never fails: every transport or protocol problem is folded into
/// [`RemoteOutcome::Unavailable`], so the dispatcher only ever reasons about
/// outcomes. Implementations must treat a replayed idempotency key as
/// already applied.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Submit one queued mutation.
    async fn apply(&self, request: &ApplyRequest) -> RemoteOutcome;

    /// Read the authoritative records of one table.
    async fn fetch(&self, table: &str) -> Result<Vec<Value>>;
}
