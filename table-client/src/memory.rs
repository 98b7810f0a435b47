//! In-memory table backend
//!
//! Behaves like the hosted row store with realtime updates: every write is
//! echoed to the subscribers of that row, including the writer's own. Staff
//! tooling resolves calls through [`MemoryBackend::resolve`]. Failures can be
//! injected for tests and demos.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use shared::{TableChange, TableId, TableKey, TableRecord};
use tokio::sync::{broadcast, watch};

use crate::error::{ClientError, ClientResult};
use crate::store::{ChangeFeed, FeedSubscription, TableSource, feed_channel};

#[derive(Debug, Default)]
struct Faults {
    fail_reads: bool,
    fail_writes: u32,
}

#[derive(Debug)]
struct Inner {
    rows: Mutex<HashMap<TableId, TableRecord>>,
    faults: Mutex<Faults>,
    changes: broadcast::Sender<TableChange>,
    subscribers: watch::Sender<HashMap<TableId, usize>>,
}

#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        let (subscribers, _) = watch::channel(HashMap::new());
        Self {
            inner: Arc::new(Inner {
                rows: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                changes,
                subscribers,
            }),
        }
    }

    pub fn with_table(self, record: TableRecord) -> Self {
        self.insert(record);
        self
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<TableId, TableRecord>> {
        // A poisoned lock still holds consistent rows: every write is a
        // single insert.
        self.inner
            .rows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace a row without notifying subscribers
    pub fn insert(&self, record: TableRecord) {
        self.rows().insert(record.id, record);
    }

    pub fn get(&self, id: TableId) -> Option<TableRecord> {
        self.rows().get(&id).cloned()
    }

    /// Tables currently waiting for a waiter
    pub fn pending_calls(&self) -> Vec<TableRecord> {
        let mut pending: Vec<_> = self
            .rows()
            .values()
            .filter(|t| t.needs_attention)
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.id);
        pending
    }

    /// Set the flag and push the change to subscribers
    pub fn set_attention(&self, id: TableId, needs_attention: bool) -> Option<TableRecord> {
        let updated = {
            let mut rows = self.rows();
            let row = rows.get_mut(&id)?;
            row.needs_attention = needs_attention;
            row.clone()
        };
        self.publish(TableChange::from(&updated));
        Some(updated)
    }

    /// Staff marks the table as attended
    pub fn resolve(&self, id: TableId) -> Option<TableRecord> {
        tracing::info!(table_id = id, "Call resolved by staff");
        self.set_attention(id, false)
    }

    /// Push an arbitrary change, as the service does for edits made elsewhere
    pub fn publish(&self, change: TableChange) {
        if let Err(e) = self.inner.changes.send(change) {
            tracing::debug!("No subscribers for change: {}", e);
        }
    }

    /// Make every read fail with a transient error until turned off
    pub fn fail_reads(&self, fail: bool) {
        self.faults().fail_reads = fail;
    }

    /// Fail the next `count` writes
    pub fn fail_next_writes(&self, count: u32) {
        self.faults().fail_writes = count;
    }

    pub fn subscriber_count(&self, id: TableId) -> usize {
        self.inner
            .subscribers
            .borrow()
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    /// Wait until exactly `count` subscriptions are open on `id`
    pub async fn wait_for_subscribers(&self, id: TableId, count: usize) {
        let mut rx = self.inner.subscribers.subscribe();
        // The sender lives in `inner`, so this only ends on success
        let _ = rx
            .wait_for(|subs| subs.get(&id).copied().unwrap_or(0) == count)
            .await;
    }

    fn track_subscriber(&self, id: TableId, delta: isize) {
        self.inner.subscribers.send_modify(|subs| {
            let entry = subs.entry(id).or_insert(0);
            *entry = entry.saturating_add_signed(delta);
        });
    }
}

#[async_trait]
impl TableSource for MemoryBackend {
    async fn read_table(&self, key: &TableKey) -> ClientResult<Option<TableRecord>> {
        if self.faults().fail_reads {
            return Err(ClientError::Transient("injected read failure".into()));
        }
        Ok(self.rows().values().find(|t| t.matches(key)).cloned())
    }

    async fn write_attention(
        &self,
        id: TableId,
        needs_attention: bool,
    ) -> ClientResult<Option<TableRecord>> {
        {
            let mut faults = self.faults();
            if faults.fail_writes > 0 {
                faults.fail_writes -= 1;
                return Err(ClientError::WriteFailure("injected write failure".into()));
            }
        }
        match self.set_attention(id, needs_attention) {
            Some(row) => Ok(Some(row)),
            None => Err(ClientError::WriteFailure(format!(
                "no row updated for table #{}",
                id
            ))),
        }
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, table_id: TableId) -> ClientResult<FeedSubscription> {
        let mut changes = self.inner.changes.subscribe();
        let (publisher, subscription) = feed_channel(table_id, 64);

        self.track_subscriber(table_id, 1);
        let backend = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = publisher.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(change) if change.id == table_id => {
                            if !publisher.publish(change).await {
                                break;
                            }
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(table_id, "Subscriber lagged, {} changes skipped", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            drop(changes);
            backend.track_subscriber(table_id, -1);
        });

        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_echoes_to_subscriber() {
        let backend = MemoryBackend::new()
            .with_table(TableRecord::new(1, "1"))
            .with_table(TableRecord::new(2, "2"));
        let mut sub = backend.subscribe(1).await.unwrap();

        backend.set_attention(2, true);
        backend.write_attention(1, true).await.unwrap();

        let change = sub.next().await.unwrap();
        assert_eq!(change.id, 1);
        assert!(change.needs_attention);
        assert_eq!(backend.pending_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let backend = MemoryBackend::new().with_table(TableRecord::new(1, "1"));
        backend.fail_next_writes(1);
        assert!(backend.write_attention(1, true).await.is_err());
        assert!(backend.write_attention(1, true).await.is_ok());

        backend.fail_reads(true);
        assert!(backend.read_table(&TableKey::Id(1)).await.is_err());
        backend.fail_reads(false);
        assert!(backend.read_table(&TableKey::Id(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_write_to_missing_row_fails() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.write_attention(5, true).await,
            Err(ClientError::WriteFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_subscriber_count() {
        let backend = MemoryBackend::new().with_table(TableRecord::new(1, "1"));
        let sub = backend.subscribe(1).await.unwrap();
        assert_eq!(backend.subscriber_count(1), 1);

        drop(sub);
        backend.wait_for_subscribers(1, 0).await;
        assert_eq!(backend.subscriber_count(1), 0);
    }
}
