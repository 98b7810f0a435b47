//! Table session (page controller)
//!
//! One session per loaded page. A single task owns the
//! [`ReconciliationEngine`] and processes fetch results, feed changes,
//! write outcomes, timer fires and user commands strictly one at a time.
//! Network operations run in their own tasks and report back through the
//! event queue, so the engine never waits on them.
//!
//! ```text
//!  call_waiter / back / refresh ──▶ commands ─┐
//!  fetch / write tasks ──────────▶ events ───┼──▶ session task ──▶ watch<TableView>
//!  ChangeFeedSubscriber ─────────▶ events ───┤        │
//!  auto-reset sleep ─────────────────────────┘        ▼
//!                                            ReconciliationEngine
//! ```

use std::sync::Arc;

use shared::{TableChange, TableKey, TableKeyError, TableRecord};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::action::WaiterCall;
use crate::config::SessionConfig;
use crate::engine::{ClientPhase, ReconciliationEngine, TableView};
use crate::error::{ClientError, ClientResult};
use crate::fetcher::SnapshotFetcher;
use crate::memory::MemoryBackend;
use crate::store::{ChangeFeed, TableSource};
use crate::subscriber::ChangeFeedSubscriber;

/// Backing store collaborators of a session
#[derive(Debug, Clone)]
pub struct SessionServices {
    pub source: Arc<dyn TableSource>,
    pub feed: Arc<dyn ChangeFeed>,
}

impl SessionServices {
    pub fn new(source: Arc<dyn TableSource>, feed: Arc<dyn ChangeFeed>) -> Self {
        Self { source, feed }
    }

    /// Read, write and subscribe against one in-memory backend
    pub fn memory(backend: &MemoryBackend) -> Self {
        let backend = Arc::new(backend.clone());
        Self {
            source: backend.clone(),
            feed: backend,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Command {
    CallWaiter,
    BackToMenu,
    Refresh,
}

#[derive(Debug)]
enum SessionEvent {
    Loaded(ClientResult<TableRecord>),
    Refreshed(ClientResult<TableRecord>),
    Changed(TableChange),
    WriteSettled(ClientResult<Option<TableRecord>>),
}

/// Handle to a running table session
///
/// Dropping the handle ends the session and unsubscribes.
#[derive(Debug)]
pub struct TableSession {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<TableView>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TableSession {
    /// Start a session for `key`; `None` means the page has no table
    pub fn start(key: Option<TableKey>, services: SessionServices, config: SessionConfig) -> Self {
        Self::spawn(key.map(Ok), services, config)
    }

    /// Start a session from the page location (path + query string)
    ///
    /// A location without any identifier starts an unmanaged `Idle`
    /// session; a malformed identifier goes straight to `Error`.
    pub fn from_location(
        path: &str,
        query: Option<&str>,
        services: SessionServices,
        config: SessionConfig,
    ) -> Self {
        let key = match TableKey::from_location(path, query) {
            Ok(key) => Some(Ok(key)),
            Err(TableKeyError::Missing) => None,
            Err(e) => Some(Err(e)),
        };
        Self::spawn(key, services, config)
    }

    fn spawn(
        key: Option<Result<TableKey, TableKeyError>>,
        services: SessionServices,
        config: SessionConfig,
    ) -> Self {
        let mut engine = ReconciliationEngine::new(key.is_some(), config.auto_reset);
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
        let (commands_tx, commands_rx) = mpsc::channel(config.event_capacity);

        let key = match key {
            Some(Ok(key)) => Some(key),
            Some(Err(e)) => {
                engine.load_failed(&ClientError::InvalidIdentifier(e), config.failure_policy);
                None
            }
            None => None,
        };

        let (view_tx, view_rx) = watch::channel(engine.view());
        let shutdown = CancellationToken::new();

        let actor = SessionActor {
            key,
            engine,
            fetcher: SnapshotFetcher::new(services.source.clone()),
            subscriber: ChangeFeedSubscriber::new(services.feed),
            action: WaiterCall::new(services.source),
            config,
            events_tx,
            view_tx,
            fetch_in_flight: false,
        };
        let task = tokio::spawn(actor.run(commands_rx, events_rx, shutdown.clone()));

        Self {
            commands: commands_tx,
            view: view_rx,
            shutdown,
            task: Some(task),
        }
    }

    /// Current view
    pub fn view(&self) -> TableView {
        self.view.borrow().clone()
    }

    pub fn phase(&self) -> ClientPhase {
        self.view.borrow().phase
    }

    /// Receiver notified after every view change
    pub fn watch(&self) -> watch::Receiver<TableView> {
        self.view.clone()
    }

    /// Wait until the view satisfies `predicate`
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&TableView) -> bool,
    ) -> ClientResult<TableView> {
        let mut rx = self.view.clone();
        let view = rx
            .wait_for(predicate)
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        Ok(view.clone())
    }

    /// Wait until the session reaches `phase`
    pub async fn wait_for_phase(&self, phase: ClientPhase) -> ClientResult<TableView> {
        self.wait_for(|view| view.phase == phase).await
    }

    /// Call a waiter to this table
    pub async fn call_waiter(&self) -> ClientResult<()> {
        self.send(Command::CallWaiter).await
    }

    /// Leave the calling screen
    pub async fn back_to_menu(&self) -> ClientResult<()> {
        self.send(Command::BackToMenu).await
    }

    /// Re-fetch the table, e.g. when the page becomes visible again
    pub async fn refresh(&self) -> ClientResult<()> {
        self.send(Command::Refresh).await
    }

    async fn send(&self, command: Command) -> ClientResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::SessionClosed)
    }

    /// End the session and wait for it to unsubscribe
    pub async fn close(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::error!("Session task failed: {}", e);
        }
    }
}

impl Drop for TableSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct SessionActor {
    key: Option<TableKey>,
    engine: ReconciliationEngine,
    fetcher: SnapshotFetcher,
    subscriber: ChangeFeedSubscriber,
    action: WaiterCall,
    config: SessionConfig,
    events_tx: mpsc::Sender<SessionEvent>,
    view_tx: watch::Sender<TableView>,
    fetch_in_flight: bool,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<SessionEvent>,
        shutdown: CancellationToken,
    ) {
        match &self.key {
            Some(key) => {
                tracing::info!(%key, policy = %self.config.failure_policy, "Table session started");
                self.spawn_fetch(SessionEvent::Loaded);
            }
            None => tracing::info!(phase = %self.engine.phase(), "Session started without a table"),
        }

        loop {
            let reset_due = self.engine.reset_due();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event),
                _ = sleep_until(reset_due.unwrap_or_else(Instant::now)), if reset_due.is_some() => {
                    if self.engine.fire_reset(Instant::now()) {
                        tracing::info!("Attended banner expired");
                    }
                }
            }
            self.publish();
        }

        self.subscriber.close();
        tracing::info!("Table session closed");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::CallWaiter => {
                let Some(write) = self.action.begin(&mut self.engine) else {
                    return;
                };
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let result = write.send().await;
                    let _ = events.send(SessionEvent::WriteSettled(result)).await;
                });
            }
            Command::BackToMenu => self.engine.back_to_menu(),
            Command::Refresh => {
                if self.key.is_none()
                    || self.fetch_in_flight
                    || matches!(
                        self.engine.phase(),
                        ClientPhase::Error | ClientPhase::Loading
                    )
                {
                    tracing::debug!(phase = %self.engine.phase(), "Refresh skipped");
                    return;
                }
                self.spawn_fetch(SessionEvent::Refreshed);
            }
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        let now = Instant::now();
        match event {
            SessionEvent::Loaded(result) => {
                self.fetch_in_flight = false;
                match result {
                    Ok(record) => self.on_loaded(record, now),
                    Err(e) => self.engine.load_failed(&e, self.config.failure_policy),
                }
            }
            SessionEvent::Refreshed(result) => {
                self.fetch_in_flight = false;
                match result {
                    // Lenient fallback without a table: this is the first load
                    Ok(record) if self.engine.table().is_none() => self.on_loaded(record, now),
                    Ok(record) => {
                        self.engine.apply_snapshot(record, now);
                    }
                    Err(e) => tracing::warn!("Refresh failed, keeping current state: {}", e),
                }
            }
            SessionEvent::Changed(change) => {
                tracing::debug!(table_id = change.id, needs_attention = change.needs_attention, "Table changed");
                self.engine.apply_change(&change, now);
            }
            SessionEvent::WriteSettled(result) => WaiterCall::settle(&mut self.engine, result, now),
        }
    }

    fn on_loaded(&mut self, record: TableRecord, now: Instant) {
        let table_id = record.id;
        self.engine.load_succeeded(record, now);
        if !self.subscriber.is_open() {
            self.subscriber
                .open(table_id, self.events_tx.clone(), SessionEvent::Changed);
        }
    }

    fn spawn_fetch(&mut self, wrap: fn(ClientResult<TableRecord>) -> SessionEvent) {
        let Some(key) = self.key.clone() else {
            return;
        };
        self.fetch_in_flight = true;
        let fetcher = self.fetcher.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = fetcher.fetch(&key).await;
            let _ = events.send(wrap(result)).await;
        });
    }

    fn publish(&self) {
        let next = self.engine.view();
        self.view_tx.send_if_modified(|view| {
            if *view != next {
                *view = next;
                true
            } else {
                false
            }
        });
    }
}
