//! Fetch process: replace the replica with the remote cart.

use cart_sync_core::{CartLine, UserKey};
use tracing::{debug, info, instrument};

use super::CartEngine;
use super::state::{EngineState, FetchPhase};
use crate::error::{CartError, Result};
use crate::identity::TokenProvider;
use crate::remote::CartRemote;

/// A fetch that has been registered in state but not yet run.
#[derive(Debug)]
pub(crate) struct FetchJob {
    epoch: u64,
    ticket: u64,
    user: UserKey,
}

impl<R: CartRemote, T: TokenProvider> CartEngine<R, T> {
    /// Refetch the cart of the signed-in user, replacing the replica.
    ///
    /// A newer fetch supersedes this one; the superseded result is dropped.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without a signed-in user, otherwise the token or
    /// remote failure. On failure the replica is emptied.
    #[instrument(skip(self))]
    pub async fn force_fetch(&self) -> Result<()> {
        let job = self.update(|state| {
            if state.shut_down {
                return Err(CartError::ShutDown);
            }
            let Some(user) = state.identity.active_user().cloned() else {
                state.record_error(&CartError::NotAuthenticated);
                return Err(CartError::NotAuthenticated);
            };
            Ok(self.begin_fetch(state, user))
        })?;
        self.run_fetch(job).await
    }

    /// Register a new fetch. Any armed sync is disarmed: the fetch result
    /// replaces whatever it would have pushed.
    pub(crate) fn begin_fetch(&self, state: &mut EngineState, user: UserKey) -> FetchJob {
        let ticket = state.ticket();
        state.fetch = FetchPhase::InFlight { ticket };
        state.last_error = None;
        state.disarm_sync();
        debug!(ticket, user = %user, "Fetch started");
        FetchJob {
            epoch: state.epoch,
            ticket,
            user,
        }
    }

    pub(crate) async fn run_fetch(&self, job: FetchJob) -> Result<()> {
        let epoch = job.epoch;
        let guard = FetchGuard {
            engine: self,
            job: Some(job),
        };
        let remote = self.remote();
        let result = self
            .call_remote(epoch, |token| async move { remote.read_cart(&token).await })
            .await;
        guard.complete(result)
    }
}

/// Closes the fetch phase even if the fetch future is dropped mid-flight.
struct FetchGuard<'a, R: CartRemote, T: TokenProvider> {
    engine: &'a CartEngine<R, T>,
    job: Option<FetchJob>,
}

impl<R: CartRemote, T: TokenProvider> FetchGuard<'_, R, T> {
    fn complete(mut self, result: Result<Vec<CartLine>>) -> Result<()> {
        let Some(job) = self.job.take() else {
            return result.map(drop);
        };
        self.engine.update(|state| {
            if !state.owns_fetch(job.epoch, job.ticket) {
                debug!(ticket = job.ticket, "Discarding superseded fetch");
                return result.map(drop);
            }
            state.fetch = FetchPhase::Idle;
            state.loaded = true;
            state.last_fetched = Some(job.user);
            // The replica now mirrors the remote, so nothing is left to push.
            state.dirty = false;
            match result {
                Ok(lines) => {
                    state.replica.replace(lines);
                    info!(lines = state.replica.len(), "Cart fetched");
                    Ok(())
                }
                Err(err) => {
                    state.replica.clear();
                    state.record_error(&err);
                    Err(err)
                }
            }
        })
    }
}

impl<R: CartRemote, T: TokenProvider> Drop for FetchGuard<'_, R, T> {
    fn drop(&mut self) {
        let Some(job) = self.job.take() else {
            return;
        };
        self.engine.update(|state| {
            if state.owns_fetch(job.epoch, job.ticket) {
                debug!(ticket = job.ticket, "Fetch cancelled");
                state.fetch = FetchPhase::Idle;
                state.loaded = true;
                state.last_fetched = Some(job.user);
            }
        });
    }
}
