//! Database module for PostgreSQL persistence.

mod ledger;
mod pool;
mod records;

pub use ledger::*;
pub use pool::*;
pub use records::*;
