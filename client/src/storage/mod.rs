//! Local durable store backed by SQLite.
//!
//! Two collections live here: the mutation queue and the read cache. Writes
//! that must land together (a queue row and its optimistic effect) share one
//! transaction.

mod cache;
mod pool;
mod queue;

pub use cache::*;
pub use pool::*;
pub use queue::*;
