//! Waiter-call action
//!
//! `begin` flips the engine to `Calling` before anything touches the
//! network and hands back the write to run. The write's outcome is fed
//! back through `settle`, so the engine only ever changes inside the
//! session loop.

use std::sync::Arc;

use shared::{TableId, TableRecord};
use tokio::time::Instant;

use crate::engine::ReconciliationEngine;
use crate::error::{ClientError, ClientResult};
use crate::store::TableSource;

#[derive(Debug, Clone)]
pub struct WaiterCall {
    source: Arc<dyn TableSource>,
}

impl WaiterCall {
    pub fn new(source: Arc<dyn TableSource>) -> Self {
        Self { source }
    }

    /// Start a call. `None` when the engine treats it as a no-op.
    pub fn begin(&self, engine: &mut ReconciliationEngine) -> Option<PendingWrite> {
        let table_id = engine.begin_call()?;
        tracing::info!(table_id, "Calling waiter");
        Some(PendingWrite {
            table_id,
            source: self.source.clone(),
        })
    }

    /// Feed the write's outcome back into the engine
    pub fn settle(
        engine: &mut ReconciliationEngine,
        result: ClientResult<Option<TableRecord>>,
        now: Instant,
    ) {
        match result {
            Ok(echoed) => engine.call_succeeded(echoed, now),
            Err(e) => engine.call_failed(&e),
        }
    }
}

/// The single `needs_attention = true` write of one call
#[derive(Debug)]
pub struct PendingWrite {
    table_id: TableId,
    source: Arc<dyn TableSource>,
}

impl PendingWrite {
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub async fn send(self) -> ClientResult<Option<TableRecord>> {
        self.source
            .write_attention(self.table_id, true)
            .await
            .map_err(|e| match e {
                ClientError::WriteFailure(msg) => ClientError::WriteFailure(msg),
                other => ClientError::WriteFailure(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ClientPhase;
    use crate::memory::MemoryBackend;
    use std::time::Duration;

    fn engine_with(backend: &MemoryBackend, id: TableId) -> ReconciliationEngine {
        let mut engine = ReconciliationEngine::new(true, Duration::from_secs(5));
        engine.load_succeeded(backend.get(id).unwrap(), Instant::now());
        engine
    }

    #[tokio::test]
    async fn test_call_writes_once() {
        let backend = MemoryBackend::new().with_table(TableRecord::new(3, "3"));
        let action = WaiterCall::new(Arc::new(backend.clone()));
        let mut engine = engine_with(&backend, 3);

        let write = action.begin(&mut engine).unwrap();
        assert_eq!(write.table_id(), 3);
        assert!(action.begin(&mut engine).is_none());
        assert_eq!(engine.phase(), ClientPhase::Calling);

        let result = write.send().await;
        WaiterCall::settle(&mut engine, result, Instant::now());
        assert_eq!(engine.phase(), ClientPhase::Calling);
        assert!(backend.get(3).unwrap().needs_attention);
    }

    #[tokio::test]
    async fn test_failed_write_reverts() {
        let backend = MemoryBackend::new().with_table(TableRecord::new(3, "3"));
        backend.fail_next_writes(1);
        let action = WaiterCall::new(Arc::new(backend.clone()));
        let mut engine = engine_with(&backend, 3);

        let result = action.begin(&mut engine).unwrap().send().await;
        assert!(matches!(result, Err(ClientError::WriteFailure(_))));
        WaiterCall::settle(&mut engine, result, Instant::now());

        assert_eq!(engine.phase(), ClientPhase::Idle);
        assert!(engine.error().is_some());
        assert!(action.begin(&mut engine).is_some());
    }
}
