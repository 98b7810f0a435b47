//! Reconciliation engine
//!
//! Holds the last applied [`TableRecord`] and derives the client-visible
//! [`ClientPhase`] from it. Every decision reads the engine's own retained
//! record; nothing is captured at subscription time.
//!
//! ```text
//!            fetch v=false              call / push v=true
//! Loading ───────────────▶ Idle ─────────────────────────▶ Calling
//!    │  fetch v=true         ▲                                │
//!    └───────────────────────┼──────────────▶ Calling         │ push v=false
//!                            │ timer                          ▼ (true→false)
//!                            └──────────────────────────── Attended
//! ```
//!
//! The engine is synchronous and owns no tasks. The session drives it one
//! event at a time and sleeps until [`ReconciliationEngine::reset_due`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shared::{TableChange, TableId, TableRecord};
use tokio::time::Instant;

use crate::error::{ClientError, FailureKind};
use crate::fetcher::FetchFailurePolicy;

/// Client-visible phase of a table page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientPhase {
    Loading,
    Error,
    Idle,
    Calling,
    Attended,
}

impl fmt::Display for ClientPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientPhase::Loading => write!(f, "loading"),
            ClientPhase::Error => write!(f, "error"),
            ClientPhase::Idle => write!(f, "idle"),
            ClientPhase::Calling => write!(f, "calling"),
            ClientPhase::Attended => write!(f, "attended"),
        }
    }
}

/// What the view layer renders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableView {
    pub phase: ClientPhase,
    pub table: Option<TableRecord>,
    /// Last surfaced error, if any
    pub error: Option<String>,
    /// Whether the call-waiter action would start a write
    pub can_call: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingReset {
    seq: u64,
    due: Instant,
}

/// The one waiter-call write allowed in flight
#[derive(Debug, Clone, Copy)]
struct CallInFlight {
    previous: ClientPhase,
    /// User went back to the menu before the write settled
    dismissed: bool,
    /// The feed delivered `needs_attention = true` after the write was
    /// issued. The feed is ordered, so anything after that is newer than
    /// the write's own row.
    confirmed_by_feed: bool,
}

#[derive(Debug)]
pub struct ReconciliationEngine {
    phase: ClientPhase,
    table: Option<TableRecord>,
    error: Option<String>,
    pending_reset: Option<PendingReset>,
    reset_seq: u64,
    call: Option<CallInFlight>,
    auto_reset: Duration,
}

impl ReconciliationEngine {
    /// `Loading` when the page carries a table identifier, `Idle` otherwise
    pub fn new(has_identifier: bool, auto_reset: Duration) -> Self {
        Self {
            phase: if has_identifier {
                ClientPhase::Loading
            } else {
                ClientPhase::Idle
            },
            table: None,
            error: None,
            pending_reset: None,
            reset_seq: 0,
            call: None,
            auto_reset,
        }
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn table(&self) -> Option<&TableRecord> {
        self.table.as_ref()
    }

    pub fn table_id(&self) -> Option<TableId> {
        self.table.as_ref().map(|t| t.id)
    }

    /// Remembered `needs_attention` of the last applied record
    pub fn needs_attention(&self) -> Option<bool> {
        self.table.as_ref().map(|t| t.needs_attention)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// When the pending auto-reset fires, if one is scheduled
    pub fn reset_due(&self) -> Option<Instant> {
        self.pending_reset.map(|p| p.due)
    }

    pub fn call_in_flight(&self) -> bool {
        self.call.is_some()
    }

    pub fn can_call(&self) -> bool {
        self.call.is_none()
            && self.table.is_some()
            && matches!(
                self.phase,
                ClientPhase::Idle | ClientPhase::Attended | ClientPhase::Error
            )
    }

    pub fn view(&self) -> TableView {
        TableView {
            phase: self.phase,
            table: self.table.clone(),
            error: self.error.clone(),
            can_call: self.can_call(),
        }
    }

    // ========== Fetch ==========

    /// Apply the initial fetch result
    ///
    /// With a record already held this is a refresh and reconciles like a
    /// push.
    pub fn load_succeeded(&mut self, record: TableRecord, now: Instant) {
        if self.table.is_some() {
            self.apply_snapshot(record, now);
            return;
        }
        let phase = if record.needs_attention {
            ClientPhase::Calling
        } else {
            ClientPhase::Idle
        };
        tracing::info!(table_id = record.id, %phase, "Table loaded");
        self.table = Some(record);
        self.error = None;
        self.set_phase(phase);
    }

    /// Apply a failed initial fetch under the session's policy
    ///
    /// A malformed identifier is always an error, whatever the policy.
    pub fn load_failed(&mut self, err: &ClientError, policy: FetchFailurePolicy) {
        if self.table.is_some() {
            tracing::warn!("Ignoring load failure with a table already held: {}", err);
            return;
        }
        let strict =
            policy == FetchFailurePolicy::Strict || err.kind() == FailureKind::InvalidIdentifier;
        if strict {
            tracing::warn!(%policy, "Table load failed: {}", err);
            self.error = Some(err.to_string());
            self.set_phase(ClientPhase::Error);
        } else {
            tracing::info!(%policy, "Table load failed, continuing without a table: {}", err);
            self.error = None;
            self.set_phase(ClientPhase::Idle);
        }
    }

    // ========== Push / ack ==========

    /// Apply a pushed row change. Returns whether it was applied.
    pub fn apply_change(&mut self, change: &TableChange, now: Instant) -> bool {
        if self.phase == ClientPhase::Error {
            return false;
        }
        let Some(table) = self.table.as_mut() else {
            tracing::debug!(table_id = change.id, "Change before load, ignored");
            return false;
        };
        if table.id != change.id {
            tracing::warn!(table_id = table.id, other = change.id, "Change for another table ignored");
            return false;
        }
        let previous = table.apply(change);
        if change.needs_attention
            && let Some(call) = self.call.as_mut()
        {
            call.confirmed_by_feed = true;
        }
        self.reconcile(previous, change.needs_attention, now);
        true
    }

    /// Replace the held record with a full snapshot (refresh or write echo)
    pub fn apply_snapshot(&mut self, record: TableRecord, now: Instant) -> bool {
        if self.phase == ClientPhase::Error {
            return false;
        }
        let Some(table) = self.table.as_mut() else {
            return false;
        };
        if table.id != record.id {
            tracing::warn!(table_id = table.id, other = record.id, "Snapshot for another table ignored");
            return false;
        }
        let previous = table.needs_attention;
        let current = record.needs_attention;
        *table = record;
        self.reconcile(previous, current, now);
        true
    }

    fn reconcile(&mut self, previous: bool, current: bool, now: Instant) {
        match (previous, current) {
            (false, true) => {
                if self.call.is_some_and(|c| c.dismissed) {
                    // The user already left the calling screen
                    return;
                }
                self.cancel_reset();
                self.set_phase(ClientPhase::Calling);
            }
            (true, true) => {
                // No edge: idempotent
            }
            (true, false) => {
                self.set_phase(ClientPhase::Attended);
                self.schedule_reset(now);
            }
            (false, false) => {
                // A pre-write echo while our call is in flight keeps Calling
                if self.call.is_none() && self.phase == ClientPhase::Calling {
                    self.set_phase(ClientPhase::Idle);
                }
            }
        }
    }

    // ========== Waiter call ==========

    /// Optimistically enter `Calling`
    ///
    /// Returns the table to write, or `None` when the call is a no-op
    /// (already calling, write in flight, no table).
    pub fn begin_call(&mut self) -> Option<TableId> {
        if !self.can_call() {
            tracing::debug!(phase = %self.phase, in_flight = self.call.is_some(), "Call waiter ignored");
            return None;
        }
        let table_id = self.table_id()?;
        self.call = Some(CallInFlight {
            previous: self.phase,
            dismissed: false,
            confirmed_by_feed: false,
        });
        self.cancel_reset();
        self.error = None;
        self.set_phase(ClientPhase::Calling);
        Some(table_id)
    }

    /// The write persisted
    ///
    /// `echoed` is the row the store returned, if any. It is applied unless
    /// the feed already confirmed the call, in which case later feed
    /// changes (a staff resolve) are newer than the echo.
    pub fn call_succeeded(&mut self, echoed: Option<TableRecord>, now: Instant) {
        let Some(call) = self.call else {
            return;
        };
        if !call.confirmed_by_feed {
            match echoed {
                Some(record) => {
                    self.apply_snapshot(record, now);
                }
                None => {
                    if let Some(table) = self.table.as_mut() {
                        let previous = table.needs_attention;
                        table.needs_attention = true;
                        self.reconcile(previous, true, now);
                    }
                }
            }
        }
        self.call = None;
        tracing::info!(phase = %self.phase, "Waiter call acknowledged");
    }

    /// The write failed: revert the optimistic transition
    pub fn call_failed(&mut self, err: &ClientError) {
        let Some(call) = self.call.take() else {
            return;
        };
        tracing::warn!("Waiter call failed: {}", err);
        self.error = Some(err.to_string());

        // The feed may have confirmed a call made elsewhere in the meantime
        if self.needs_attention() == Some(true) {
            return;
        }
        if self.phase == ClientPhase::Calling {
            let revert = match call.previous {
                ClientPhase::Attended => ClientPhase::Idle,
                other => other,
            };
            self.set_phase(revert);
        }
    }

    /// Leave the calling screen
    pub fn back_to_menu(&mut self) {
        if self.phase != ClientPhase::Calling {
            return;
        }
        if let Some(call) = self.call.as_mut() {
            call.dismissed = true;
        }
        self.set_phase(ClientPhase::Idle);
    }

    // ========== Auto reset ==========

    fn schedule_reset(&mut self, now: Instant) {
        self.reset_seq += 1;
        if let Some(prev) = self.pending_reset {
            tracing::debug!(seq = prev.seq, "Replacing pending auto-reset");
        }
        self.pending_reset = Some(PendingReset {
            seq: self.reset_seq,
            due: now + self.auto_reset,
        });
    }

    fn cancel_reset(&mut self) {
        if let Some(pending) = self.pending_reset.take() {
            tracing::debug!(seq = pending.seq, "Auto-reset cancelled");
        }
    }

    /// Fire the auto-reset if it is due. Returns whether it fired.
    pub fn fire_reset(&mut self, now: Instant) -> bool {
        match self.pending_reset {
            Some(pending) if pending.due <= now => {
                self.pending_reset = None;
                if self.phase == ClientPhase::Attended {
                    self.set_phase(ClientPhase::Idle);
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    fn set_phase(&mut self, next: ClientPhase) {
        if self.phase != next {
            tracing::debug!(from = %self.phase, to = %next, "Phase transition");
            if self.phase == ClientPhase::Attended {
                self.cancel_reset();
            }
            self.phase = next;
        }
    }
}
