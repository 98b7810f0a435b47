//! Data models
//!
//! Shared between the table client, staff tooling and any server that
//! speaks the change feed protocol. All IDs are `i64`.

pub mod dining_table;

// Re-exports
pub use dining_table::*;
