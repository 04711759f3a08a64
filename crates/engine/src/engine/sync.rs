//! Sync process: debounced, declarative push of the whole replica.
//!
//! Arming requires a dirty replica and a quiescent engine. Arming again
//! replaces the pending timer, so bursts of changes collapse into one
//! reconcile after the quiet window. A failed reconcile only records the
//! error; the replica is never rolled back for it.

use chrono::Utc;
use tracing::{debug, info, instrument};

use super::CartEngine;
use super::state::{EngineState, SyncPhase};
use crate::error::Result;
use crate::identity::TokenProvider;
use crate::remote::CartRemote;

impl<R: CartRemote, T: TokenProvider> CartEngine<R, T> {
    /// (Re)start the debounce timer if there is something to push.
    pub(crate) fn maybe_arm_sync(&self, state: &mut EngineState) {
        if !state.dirty || !state.quiescent() || matches!(state.sync, SyncPhase::Firing { .. }) {
            return;
        }
        state.disarm_sync();
        let ticket = state.ticket();
        let delay = self.inner.config.sync_debounce;
        let engine = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Failures are recorded in the snapshot.
            let _ = engine.fire_sync(ticket).await;
        });
        debug!(ticket, delay_ms = delay.as_millis(), "Sync armed");
        state.sync = SyncPhase::Armed { ticket, timer };
    }

    /// Push pending changes now instead of waiting out the debounce window.
    ///
    /// Does nothing unless a sync is armed.
    ///
    /// # Errors
    ///
    /// The token or reconcile failure.
    pub async fn flush(&self) -> Result<()> {
        let ticket = self.update(|state| match &state.sync {
            SyncPhase::Armed { ticket, timer } => {
                timer.abort();
                Some(*ticket)
            }
            _ => None,
        });
        match ticket {
            Some(ticket) => self.fire_sync(ticket).await,
            None => Ok(()),
        }
    }

    #[instrument(skip(self))]
    async fn fire_sync(&self, ticket: u64) -> Result<()> {
        let started = self.update(|state| {
            if !matches!(state.sync, SyncPhase::Armed { ticket: t, .. } if t == ticket) {
                return None;
            }
            if !state.quiescent() {
                debug!("Engine not quiescent; sync skipped");
                state.sync = SyncPhase::Idle;
                return None;
            }
            state.sync = SyncPhase::Firing { ticket };
            state.dirty = false;
            Some((state.epoch, state.replica.quantities()))
        });
        let Some((epoch, lines)) = started else {
            return Ok(());
        };

        let guard = SyncGuard {
            engine: self,
            epoch,
            ticket,
            done: false,
        };
        let deadline = self.deadline();
        let result = match self.token_before(deadline).await {
            // A fetch or mutation may have started while the token was pending.
            Ok(_) if !self.read(|state| state.owns_sync(epoch, ticket) && state.quiescent()) => {
                Ok(false)
            }
            Ok(token) => self
                .remote_before(deadline, self.remote().reconcile(&token, &lines))
                .await
                .map(|()| true),
            Err(err) => Err(err),
        };
        guard.complete(result, lines.len())
    }
}

/// Returns the sync process to idle even if the firing future is dropped.
struct SyncGuard<'a, R: CartRemote, T: TokenProvider> {
    engine: &'a CartEngine<R, T>,
    epoch: u64,
    ticket: u64,
    done: bool,
}

impl<R: CartRemote, T: TokenProvider> SyncGuard<'_, R, T> {
    fn complete(mut self, result: Result<bool>, lines: usize) -> Result<()> {
        self.done = true;
        self.engine.update(|state| {
            if !state.owns_sync(self.epoch, self.ticket) {
                return result.map(drop);
            }
            state.sync = SyncPhase::Idle;
            let result = match result {
                Ok(true) => {
                    state.last_synced_at = Some(Utc::now());
                    info!(lines, "Cart reconciled");
                    Ok(())
                }
                Ok(false) => {
                    debug!("Sync abandoned before reconcile");
                    state.dirty = true;
                    Ok(())
                }
                Err(err) => {
                    state.record_error(&err);
                    Err(err)
                }
            };
            self.engine.maybe_arm_sync(state);
            result
        })
    }
}

impl<R: CartRemote, T: TokenProvider> Drop for SyncGuard<'_, R, T> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.engine.update(|state| {
            if state.owns_sync(self.epoch, self.ticket) {
                state.sync = SyncPhase::Idle;
                state.dirty = true;
                self.engine.maybe_arm_sync(state);
            }
        });
    }
}
