//! Mutation process: optimistic local change, targeted remote call,
//! rollback on failure.

use std::num::NonZeroU32;

use cart_sync_core::ProductId;
use tracing::{debug, instrument};

use super::CartEngine;
use super::state::EngineState;
use crate::error::{CartError, Result};
use crate::identity::TokenProvider;
use crate::remote::CartRemote;
use crate::replica::Replica;

/// What a mutation needs to undo its optimistic change.
struct Optimistic {
    epoch: u64,
    before: Replica,
    was_dirty: bool,
    changed: bool,
}

impl<R: CartRemote, T: TokenProvider> CartEngine<R, T> {
    /// Add one unit of a product.
    ///
    /// The service decides the resulting quantity and fills in the product
    /// details, so the replica is refreshed by a fetch afterwards instead of
    /// being changed optimistically.
    ///
    /// # Errors
    ///
    /// The add failure (replica untouched) or the follow-up fetch failure.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add_or_increment(&self, product_id: ProductId) -> Result<()> {
        let (optimistic, pending) = self.begin_mutation(|_| {})?;
        let remote = self.remote();
        let result = self
            .call_remote(optimistic.epoch, |token| async move {
                remote.add_line(&token, product_id).await
            })
            .await;

        if let Err(err) = result {
            return self.finish_mutation(pending, optimistic, Err(err));
        }
        let job = self.update(|state| {
            pending.settle(state);
            if state.epoch != optimistic.epoch {
                return None;
            }
            state
                .identity
                .active_user()
                .cloned()
                .map(|user| self.begin_fetch(state, user))
        });
        match job {
            Some(job) => self.run_fetch(job).await,
            None => Ok(()),
        }
    }

    /// Set a line's quantity. Zero or less removes the line.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `IdentityChanged` if the user switched before
    /// the call went out, or the remote failure after the replica was
    /// rolled back.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn set_quantity(&self, product_id: ProductId, quantity: i64) -> Result<()> {
        let Some(quantity) = positive_quantity(quantity) else {
            return self.remove(product_id).await;
        };
        let (optimistic, pending) = self.begin_mutation(|replica| {
            replica.set_quantity(product_id, quantity);
        })?;
        let remote = self.remote();
        let result = self
            .call_remote(optimistic.epoch, |token| async move {
                remote
                    .set_line_quantity(&token, product_id, quantity)
                    .await
            })
            .await;
        self.finish_mutation(pending, optimistic, result)
    }

    /// Remove a product's line.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `IdentityChanged` if the user switched before
    /// the call went out, or the remote failure after the replica was
    /// rolled back.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn remove(&self, product_id: ProductId) -> Result<()> {
        let (optimistic, pending) = self.begin_mutation(|replica| {
            replica.remove(product_id);
        })?;
        let remote = self.remote();
        let result = self
            .call_remote(optimistic.epoch, |token| async move {
                remote.delete_line(&token, product_id).await
            })
            .await;
        self.finish_mutation(pending, optimistic, result)
    }

    /// Remove every line.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `IdentityChanged` if the user switched before
    /// the call went out, or the remote failure after the replica was
    /// rolled back.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        let (optimistic, pending) = self.begin_mutation(Replica::clear)?;
        let remote = self.remote();
        let result = self
            .call_remote(optimistic.epoch, |token| async move {
                remote.delete_all(&token).await
            })
            .await;
        self.finish_mutation(pending, optimistic, result)
    }

    fn begin_mutation(
        &self,
        apply: impl FnOnce(&mut Replica),
    ) -> Result<(Optimistic, PendingMutation<'_, R, T>)> {
        let optimistic = self.update(|state| {
            if state.shut_down {
                return Err(CartError::ShutDown);
            }
            if state.identity.active_user().is_none() {
                state.record_error(&CartError::NotAuthenticated);
                return Err(CartError::NotAuthenticated);
            }
            state.last_error = None;
            let before = state.replica.clone();
            apply(&mut state.replica);
            let changed = state.replica != before;
            let was_dirty = state.dirty;
            state.dirty |= changed;
            state.pending_mutations += 1;
            Ok(Optimistic {
                epoch: state.epoch,
                before,
                was_dirty,
                changed,
            })
        })?;
        Ok((
            optimistic,
            PendingMutation {
                engine: self,
                settled: false,
            },
        ))
    }

    fn finish_mutation(
        &self,
        pending: PendingMutation<'_, R, T>,
        optimistic: Optimistic,
        result: Result<()>,
    ) -> Result<()> {
        self.update(|state| {
            pending.settle(state);
            if state.epoch != optimistic.epoch {
                debug!("Identity changed during mutation; leaving replica alone");
                return;
            }
            if let Err(err) = &result {
                if optimistic.changed {
                    state.replica = optimistic.before;
                    state.dirty = optimistic.was_dirty;
                }
                state.record_error(err);
            }
            self.maybe_arm_sync(state);
        });
        result
    }
}

/// Non-positive quantities mean removal; anything above `u32::MAX` saturates.
fn positive_quantity(quantity: i64) -> Option<NonZeroU32> {
    if quantity <= 0 {
        return None;
    }
    NonZeroU32::new(u32::try_from(quantity).unwrap_or(u32::MAX))
}

/// Counts one targeted remote call in flight. Dropping it unsettled (the
/// command future was cancelled) still releases the count.
struct PendingMutation<'a, R: CartRemote, T: TokenProvider> {
    engine: &'a CartEngine<R, T>,
    settled: bool,
}

impl<R: CartRemote, T: TokenProvider> PendingMutation<'_, R, T> {
    /// Release the count inside an existing state section.
    fn settle(mut self, state: &mut EngineState) {
        state.pending_mutations = state.pending_mutations.saturating_sub(1);
        self.settled = true;
    }
}

impl<R: CartRemote, T: TokenProvider> Drop for PendingMutation<'_, R, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.engine.update(|state| {
            state.pending_mutations = state.pending_mutations.saturating_sub(1);
            self.engine.maybe_arm_sync(state);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_quantity() {
        assert_eq!(positive_quantity(0), None);
        assert_eq!(positive_quantity(-3), None);
        assert_eq!(positive_quantity(4).map(NonZeroU32::get), Some(4));
        assert_eq!(positive_quantity(i64::MAX).map(NonZeroU32::get), Some(u32::MAX));
    }
}
