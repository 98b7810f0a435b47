//! Shared types for the table-call workspace
//!
//! Table models and the change feed message protocol, used by the
//! table client and by whatever serves the feed.

pub mod message;
pub mod models;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

// Message bus re-exports (for convenient access)
pub use message::{BusMessage, EventType};

pub use models::{TableChange, TableId, TableKey, TableKeyError, TableRecord};
