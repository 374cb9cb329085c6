//! Notifications published by the engine, and the signals that drive it.

use ferry_engine::{QueueSummary, TableName};
use serde::Serialize;

/// Observable changes, delivered over a broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// Queue counts moved
    Changed(QueueSummary),
    /// A dispatch pass finished
    PassCompleted(PassReport),
    /// A table was refreshed from the remote
    Reconciled {
        table: TableName,
        replaced: usize,
        removed: usize,
    },
}

/// What one dispatch pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub submitted: usize,
    pub synced: usize,
    pub retried: usize,
    pub failed: usize,
    /// Local storage errors that stopped a table early
    pub errors: Vec<String>,
}

impl PassReport {
    pub(crate) fn merge(&mut self, other: PassReport) {
        self.submitted += other.submitted;
        self.synced += other.synced;
        self.retried += other.retried;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }
}

/// Platform connectivity, as reported by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivitySignal {
    Online,
    Offline,
}

/// Reasons to wake the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    Enqueued,
    Connectivity(ConnectivitySignal),
    Discarded,
    /// Periodic pass timer, or a backed-off entry coming due
    Tick,
    /// A pass left entries backing off; recompute the next wake-up
    Rescheduled,
}
