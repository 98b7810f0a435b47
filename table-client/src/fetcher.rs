//! Table snapshot fetcher
//!
//! One read per call, no retries, no state. What a failure means for the
//! page is decided by [`FetchFailurePolicy`], applied once per session.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use shared::{TableKey, TableRecord};

use crate::error::{ClientError, ClientResult, FailureKind};
use crate::store::TableSource;

/// What a failed initial fetch turns into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchFailurePolicy {
    /// Surface the `Error` phase; terminal until the page is reloaded
    #[default]
    Strict,
    /// Treat the page as an unmanaged table: `Idle`, call-waiter disabled
    Lenient,
}

impl fmt::Display for FetchFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailurePolicy::Strict => write!(f, "strict"),
            FetchFailurePolicy::Lenient => write!(f, "lenient"),
        }
    }
}

impl FromStr for FetchFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(FetchFailurePolicy::Strict),
            "lenient" => Ok(FetchFailurePolicy::Lenient),
            other => Err(format!("unknown failure policy {:?}", other)),
        }
    }
}

/// Loads a table's current record
#[derive(Debug, Clone)]
pub struct SnapshotFetcher {
    source: Arc<dyn TableSource>,
}

impl SnapshotFetcher {
    pub fn new(source: Arc<dyn TableSource>) -> Self {
        Self { source }
    }

    /// Fetch the record for `key`
    ///
    /// Errors are normalized to `NotFound` or `Transient`.
    pub async fn fetch(&self, key: &TableKey) -> ClientResult<TableRecord> {
        match self.source.read_table(key).await {
            Ok(Some(record)) if record.matches(key) => {
                tracing::debug!(table_id = record.id, needs_attention = record.needs_attention, "Fetched table");
                Ok(record)
            }
            Ok(Some(record)) => Err(ClientError::Transient(format!(
                "store returned table #{} for {}",
                record.id, key
            ))),
            Ok(None) => Err(ClientError::NotFound(key.to_string())),
            Err(e) => match e.kind() {
                FailureKind::NotFound => Err(ClientError::NotFound(key.to_string())),
                _ => Err(ClientError::Transient(e.to_string())),
            },
        }
    }
}
