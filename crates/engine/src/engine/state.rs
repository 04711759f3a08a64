//! Engine state shared by the gate, fetch, mutation and sync processes.
//!
//! All fields live behind one mutex that is never held across an `.await`.
//! Each process owns a phase enum instead of a loose busy flag, and async
//! completions carry the `epoch` and `ticket` they started under so a
//! superseded completion can recognise itself and leave state alone.

use cart_sync_core::{CartLine, Price, ProductId, UserKey};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::CartError;
use crate::identity::IdentityState;
use crate::replica::Replica;

/// Fetch process phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchPhase {
    Idle,
    InFlight { ticket: u64 },
}

/// Sync process phase: `Idle -> Armed -> Firing -> Idle`.
#[derive(Debug)]
pub(crate) enum SyncPhase {
    Idle,
    /// Debounce timer pending.
    Armed { ticket: u64, timer: JoinHandle<()> },
    /// Reconcile call in flight.
    Firing { ticket: u64 },
}

/// Public view of the sync process phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Armed,
    Firing,
}

pub(crate) struct EngineState {
    pub identity: IdentityState,
    /// Bumped on every user change and on shutdown.
    pub epoch: u64,
    next_ticket: u64,
    pub loaded: bool,
    pub last_fetched: Option<UserKey>,
    pub replica: Replica,
    pub fetch: FetchPhase,
    pub sync: SyncPhase,
    pub pending_mutations: usize,
    /// Replica holds local changes the last reconcile did not carry.
    pub dirty: bool,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub shut_down: bool,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            identity: IdentityState::pending(),
            epoch: 0,
            next_ticket: 0,
            loaded: false,
            last_fetched: None,
            replica: Replica::default(),
            fetch: FetchPhase::Idle,
            sync: SyncPhase::Idle,
            pending_mutations: 0,
            dirty: false,
            last_error: None,
            last_synced_at: None,
            shut_down: false,
        }
    }

    pub fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    pub fn busy(&self) -> bool {
        !self.identity.ready
            || self.fetch != FetchPhase::Idle
            || self.pending_mutations > 0
            || matches!(self.sync, SyncPhase::Firing { .. })
    }

    /// Loaded, authenticated, and no fetch or targeted remote call in flight.
    pub fn quiescent(&self) -> bool {
        !self.shut_down
            && self.loaded
            && self.identity.active_user().is_some()
            && self.fetch == FetchPhase::Idle
            && self.pending_mutations == 0
    }

    pub fn owns_fetch(&self, epoch: u64, ticket: u64) -> bool {
        self.epoch == epoch && self.fetch == FetchPhase::InFlight { ticket }
    }

    pub fn owns_sync(&self, epoch: u64, ticket: u64) -> bool {
        self.epoch == epoch && matches!(self.sync, SyncPhase::Firing { ticket: t } if t == ticket)
    }

    /// Cancel a pending debounce timer. A firing sync is left alone.
    pub fn disarm_sync(&mut self) {
        if let SyncPhase::Armed { timer, .. } = &self.sync {
            timer.abort();
            self.sync = SyncPhase::Idle;
        }
    }

    /// Drop the sync process back to idle whatever its phase.
    pub fn reset_sync(&mut self) {
        self.disarm_sync();
        self.sync = SyncPhase::Idle;
    }

    pub fn record_error(&mut self, err: &CartError) {
        warn!(error = %err, "Cart operation failed");
        self.last_error = Some(err.to_string());
    }

    pub fn snapshot(&self) -> CartSnapshot {
        let totals = self.replica.totals();
        CartSnapshot {
            user: self.identity.user.clone(),
            lines: self.replica.lines().to_vec(),
            total_items: totals.total_items,
            total_price: totals.total_price,
            loaded: self.loaded,
            busy: self.busy(),
            sync: match self.sync {
                SyncPhase::Idle => SyncStatus::Idle,
                SyncPhase::Armed { .. } => SyncStatus::Armed,
                SyncPhase::Firing { .. } => SyncStatus::Firing,
            },
            last_error: self.last_error.clone(),
            last_synced_at: self.last_synced_at,
        }
    }
}

/// Read contract exposed to UI and checkout collaborators.
///
/// Totals are derived from `lines` when the snapshot is taken, so they are
/// always consistent with the lines next to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSnapshot {
    pub user: Option<UserKey>,
    pub lines: Vec<CartLine>,
    pub total_items: u64,
    pub total_price: Price,
    /// The lines reflect a completed fetch (or authoritative empty state).
    pub loaded: bool,
    pub busy: bool,
    pub sync: SyncStatus,
    /// Message of the most recent failure, cleared when the next command starts.
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl CartSnapshot {
    #[must_use]
    pub fn line(&self, product_id: ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    /// Quantity of a product, zero when absent.
    #[must_use]
    pub fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.line(product_id).map_or(0, |l| l.quantity.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_is_busy_and_unloaded() {
        let state = EngineState::new();
        let snapshot = state.snapshot();
        assert!(snapshot.busy);
        assert!(!snapshot.loaded);
        assert_eq!(snapshot.total_items, 0);
        assert_eq!(snapshot.sync, SyncStatus::Idle);
        assert!(!state.quiescent());
    }

    #[test]
    fn test_quiescent_requires_every_condition() {
        let mut state = EngineState::new();
        state.identity = IdentityState::signed_in("u1");
        state.loaded = true;
        assert!(state.quiescent());
        assert!(!state.busy());

        state.pending_mutations = 1;
        assert!(!state.quiescent());
        state.pending_mutations = 0;

        state.fetch = FetchPhase::InFlight { ticket: 1 };
        assert!(!state.quiescent());
        state.fetch = FetchPhase::Idle;

        state.identity.ready = false;
        assert!(!state.quiescent());
        state.identity.ready = true;

        state.shut_down = true;
        assert!(!state.quiescent());
    }

    #[test]
    fn test_ownership_checks_epoch_and_ticket() {
        let mut state = EngineState::new();
        let ticket = state.ticket();
        state.fetch = FetchPhase::InFlight { ticket };
        assert!(state.owns_fetch(0, ticket));
        assert!(!state.owns_fetch(0, ticket + 1));
        state.epoch += 1;
        assert!(!state.owns_fetch(0, ticket));

        state.sync = SyncPhase::Firing { ticket: 9 };
        assert!(state.owns_sync(1, 9));
        assert!(!state.owns_sync(0, 9));
    }

    #[test]
    fn test_record_error_overwrites() {
        let mut state = EngineState::new();
        state.record_error(&CartError::NotAuthenticated);
        state.record_error(&CartError::ShutDown);
        assert_eq!(state.last_error.as_deref(), Some("Cart engine is shut down"));
    }

    #[test]
    fn test_reset_sync_from_firing() {
        let mut state = EngineState::new();
        state.sync = SyncPhase::Firing { ticket: 3 };
        state.disarm_sync();
        assert!(matches!(state.sync, SyncPhase::Firing { .. }));
        state.reset_sync();
        assert!(matches!(state.sync, SyncPhase::Idle));
    }
}
