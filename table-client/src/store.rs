//! Backing store seams
//!
//! The table client never talks to a concrete backend directly. Reads and
//! writes go through [`TableSource`], push updates through [`ChangeFeed`].
//! [`crate::HttpClient`], [`crate::FeedClient`] and [`crate::MemoryBackend`]
//! are the shipped implementations.

use async_trait::async_trait;
use shared::{TableChange, TableId, TableKey, TableRecord};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::ClientResult;

/// Row-level read/write access to dining tables
#[async_trait]
pub trait TableSource: Send + Sync + std::fmt::Debug {
    /// Read one table. `Ok(None)` means no row matches.
    async fn read_table(&self, key: &TableKey) -> ClientResult<Option<TableRecord>>;

    /// Set `needs_attention` on one table.
    ///
    /// Returns the updated row when the store echoes it back.
    async fn write_attention(
        &self,
        id: TableId,
        needs_attention: bool,
    ) -> ClientResult<Option<TableRecord>>;
}

/// Server-filtered push channel for one table's row updates
#[async_trait]
pub trait ChangeFeed: Send + Sync + std::fmt::Debug {
    async fn subscribe(&self, table_id: TableId) -> ClientResult<FeedSubscription>;
}

/// Create a linked publisher/subscription pair
///
/// Feed implementations keep the publisher in their forwarding task and
/// hand the subscription to the caller.
pub fn feed_channel(table_id: TableId, capacity: usize) -> (FeedPublisher, FeedSubscription) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cancel = CancellationToken::new();
    (
        FeedPublisher {
            table_id,
            tx,
            cancel: cancel.clone(),
        },
        FeedSubscription {
            table_id,
            changes: rx,
            cancel,
        },
    )
}

/// Producer half of a feed subscription
#[derive(Debug)]
pub struct FeedPublisher {
    table_id: TableId,
    tx: mpsc::Sender<TableChange>,
    cancel: CancellationToken,
}

impl FeedPublisher {
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Deliver one change. Returns `false` once the subscription is gone.
    pub async fn publish(&self, change: TableChange) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(change).await.is_ok()
    }

    /// Resolves when the subscriber closes or drops the subscription
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// Consumer half of a feed subscription
///
/// Changes arrive in server-delivery order. Dropping the subscription
/// unsubscribes.
#[derive(Debug)]
pub struct FeedSubscription {
    table_id: TableId,
    changes: mpsc::Receiver<TableChange>,
    cancel: CancellationToken,
}

impl FeedSubscription {
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Next change, or `None` when the feed has ended
    pub async fn next(&mut self) -> Option<TableChange> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.changes.recv().await
    }

    /// Ask the feed to stop delivering. Safe to call repeatedly.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
