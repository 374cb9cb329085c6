//! Request handlers for the remote store.

mod apply;
mod fetch;

pub use apply::*;
pub use fetch::*;
