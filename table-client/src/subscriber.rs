//! Change feed subscriber
//!
//! Owns the subscription lifecycle for one table session: opened once after
//! the first successful fetch, closed once when the session ends. Changes
//! are forwarded one at a time, in delivery order, into the session's event
//! queue, so the handler never runs concurrently with itself.

use std::sync::Arc;

use shared::{TableChange, TableId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::store::ChangeFeed;

#[derive(Debug)]
enum SubscriberState {
    Idle,
    Open {
        table_id: TableId,
        cancel: CancellationToken,
    },
    Closed,
}

/// Single-table push subscription
#[derive(Debug)]
pub struct ChangeFeedSubscriber {
    feed: Arc<dyn ChangeFeed>,
    state: SubscriberState,
}

impl ChangeFeedSubscriber {
    pub fn new(feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            feed,
            state: SubscriberState::Idle,
        }
    }

    /// Subscribe to `table_id` and forward every change into `sink`
    ///
    /// Returns `false` if a subscription was already opened (or closed) for
    /// this session. Subscribing happens in the background; a failed
    /// subscribe is logged and leaves the session without updates.
    pub fn open<T>(
        &mut self,
        table_id: TableId,
        sink: mpsc::Sender<T>,
        wrap: fn(TableChange) -> T,
    ) -> bool
    where
        T: Send + 'static,
    {
        if !matches!(self.state, SubscriberState::Idle) {
            tracing::debug!(table_id, "Subscription already opened for this session");
            return false;
        }

        let cancel = CancellationToken::new();
        let feed = self.feed.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let subscribed = tokio::select! {
                _ = token.cancelled() => return,
                result = feed.subscribe(table_id) => result,
            };
            let mut subscription = match subscribed {
                Ok(subscription) => subscription,
                Err(e) => {
                    tracing::warn!(table_id, "Subscribe failed, no live updates: {}", e);
                    return;
                }
            };
            tracing::info!(table_id, "Subscribed to table changes");

            loop {
                let change = tokio::select! {
                    _ = token.cancelled() => break,
                    change = subscription.next() => change,
                };
                let Some(change) = change else {
                    tracing::info!(table_id, "Change feed ended");
                    break;
                };
                if change.id != table_id {
                    tracing::warn!(table_id, other = change.id, "Dropping change for another table");
                    continue;
                }
                if sink.send(wrap(change)).await.is_err() {
                    break;
                }
            }
            subscription.close();
        });

        self.state = SubscriberState::Open { table_id, cancel };
        true
    }

    /// Unsubscribe. Idempotent; safe before `open`.
    pub fn close(&mut self) {
        if let SubscriberState::Open { table_id, cancel } = &self.state {
            cancel.cancel();
            tracing::info!(table_id = *table_id, "Unsubscribed from table changes");
        }
        self.state = SubscriberState::Closed;
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SubscriberState::Open { .. })
    }

    pub fn table_id(&self) -> Option<TableId> {
        match self.state {
            SubscriberState::Open { table_id, .. } => Some(table_id),
            _ => None,
        }
    }
}

impl Drop for ChangeFeedSubscriber {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use shared::TableRecord;
    use std::time::Duration;

    #[tokio::test]
    async fn test_forwards_changes_in_order() {
        let backend = MemoryBackend::new().with_table(TableRecord::new(2, "2"));
        let mut subscriber = ChangeFeedSubscriber::new(Arc::new(backend.clone()));
        let (tx, mut rx) = mpsc::channel(8);

        assert!(subscriber.open(2, tx, |change| change));
        backend.wait_for_subscribers(2, 1).await;

        backend.set_attention(2, true);
        backend.set_attention(2, false);
        backend.set_attention(2, true);

        let flags: Vec<bool> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(|c| c.needs_attention)
        .collect();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_open_once_close_idempotent() {
        let backend = MemoryBackend::new().with_table(TableRecord::new(2, "2"));
        let mut subscriber = ChangeFeedSubscriber::new(Arc::new(backend.clone()));

        subscriber.close();
        subscriber.close();
        let (tx, _rx) = mpsc::channel::<TableChange>(1);
        assert!(!subscriber.open(2, tx, |change| change));
        assert!(!subscriber.is_open());
    }

    #[tokio::test]
    async fn test_close_unsubscribes() {
        let backend = MemoryBackend::new().with_table(TableRecord::new(4, "4"));
        let mut subscriber = ChangeFeedSubscriber::new(Arc::new(backend.clone()));
        let (tx, mut rx) = mpsc::channel(8);

        subscriber.open(4, tx, |change| change);
        backend.wait_for_subscribers(4, 1).await;
        assert_eq!(subscriber.table_id(), Some(4));

        subscriber.close();
        backend.wait_for_subscribers(4, 0).await;
        backend.set_attention(4, true);

        let next = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(matches!(next, Ok(None) | Err(_)));
    }
}
