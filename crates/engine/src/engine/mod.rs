//! The cart synchronization engine.
//!
//! # Architecture
//!
//! - One [`CartEngine`] per process; cloning it is cheap and shares state
//! - State changes happen in short synchronous sections under one mutex
//!   and each publishes a fresh [`CartSnapshot`] on a `watch` channel
//! - Remote calls run outside the lock and apply their results only if the
//!   identity epoch and process ticket they started under are still current
//!
//! # Processes
//!
//! | Process  | Trigger                         | Module          |
//! |----------|---------------------------------|-----------------|
//! | Gate     | identity transitions            | this module     |
//! | Fetch    | gate, `force_fetch`, `add`      | `fetch`         |
//! | Mutation | `set_quantity`, `remove`, ...   | `mutations`     |
//! | Sync     | replica changes, after debounce | `sync`          |

mod fetch;
mod mutations;
mod state;
mod sync;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cart_sync_core::UserKey;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, instrument};

use crate::config::EngineConfig;
use crate::error::{CartError, Result};
use crate::identity::{self, AccessToken, GateDecision, IdentityState, TokenProvider};
use crate::remote::{CartRemote, RemoteError};

pub use state::{CartSnapshot, SyncStatus};

use state::{EngineState, FetchPhase};

/// Handle to the cart engine.
///
/// Must be created and driven inside a Tokio runtime; the gate, the debounce
/// timer and identity following spawn tasks.
pub struct CartEngine<R, T> {
    inner: Arc<EngineInner<R, T>>,
}

struct EngineInner<R, T> {
    config: EngineConfig,
    remote: R,
    tokens: T,
    state: Mutex<EngineState>,
    snapshots: watch::Sender<CartSnapshot>,
    follower: Mutex<Option<JoinHandle<()>>>,
}

impl<R, T> Clone for CartEngine<R, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: CartRemote, T: TokenProvider> CartEngine<R, T> {
    /// Create an engine. It stays busy and unloaded until an identity
    /// arrives through [`set_identity`](Self::set_identity) or
    /// [`follow_identity`](Self::follow_identity).
    #[must_use]
    pub fn new(config: EngineConfig, remote: R, tokens: T) -> Self {
        let state = EngineState::new();
        let (snapshots, _) = watch::channel(state.snapshot());
        Self {
            inner: Arc::new(EngineInner {
                config,
                remote,
                tokens,
                state: Mutex::new(state),
                snapshots,
                follower: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Current read contract.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    /// Receive every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Wait until the replica is loaded and nothing is in flight.
    ///
    /// An armed debounce timer does not count as in flight. Waits forever
    /// if no ready identity ever arrives.
    pub async fn settled(&self) -> CartSnapshot {
        let mut snapshots = self.subscribe();
        let settled = snapshots.wait_for(|s| s.loaded && !s.busy).await;
        match settled {
            Ok(snapshot) => snapshot.clone(),
            // The sender lives in `inner`, which `self` keeps alive.
            Err(_) => self.snapshot(),
        }
    }

    /// Feed one identity transition into the gate.
    #[instrument(
        skip(self, next),
        fields(ready = next.ready, user = next.user.as_ref().map(UserKey::as_str))
    )]
    pub fn set_identity(&self, next: IdentityState) {
        let job = self.update(|state| {
            if state.shut_down || state.identity == next {
                return None;
            }
            if !next.ready {
                // Only report busy; the cart stays as it is until the
                // capability settles on a user.
                state.identity.ready = false;
                debug!("Identity not ready; holding current cart");
                return None;
            }
            if state.identity.user != next.user {
                // Whatever was in flight belongs to the previous user.
                state.epoch += 1;
                state.reset_sync();
                state.fetch = FetchPhase::Idle;
                state.replica.clear();
                state.loaded = false;
                state.dirty = false;
                state.last_error = None;
            }
            state.identity = next;

            let decision =
                identity::decide(&state.identity, state.loaded, state.last_fetched.as_ref());
            debug!(?decision, "Identity gate decision");
            match decision {
                GateDecision::Wait => None,
                GateDecision::Clear => {
                    state.replica.clear();
                    state.loaded = true;
                    state.last_fetched = None;
                    state.dirty = false;
                    state.reset_sync();
                    None
                }
                GateDecision::Fetch(user) => Some(self.begin_fetch(state, user)),
                GateDecision::Hold => {
                    self.maybe_arm_sync(state);
                    None
                }
            }
        });

        if let Some(job) = job {
            let engine = self.clone();
            tokio::spawn(async move {
                // Failures are recorded in the snapshot.
                let _ = engine.run_fetch(job).await;
            });
        }
    }

    /// Follow an identity stream until it closes or the engine shuts down.
    ///
    /// Replaces any stream followed before.
    pub fn follow_identity(&self, mut identity: watch::Receiver<IdentityState>) {
        if self.read(|state| state.shut_down) {
            return;
        }
        let engine = self.clone();
        let task = tokio::spawn(async move {
            loop {
                let next = identity.borrow_and_update().clone();
                engine.set_identity(next);
                if identity.changed().await.is_err() {
                    debug!("Identity stream closed");
                    break;
                }
            }
        });
        if let Some(previous) = self.follower().replace(task) {
            previous.abort();
        }
    }

    /// Stop every background process. In-flight results are discarded and
    /// later commands fail with [`CartError::ShutDown`].
    pub fn shutdown(&self) {
        self.update(|state| {
            state.shut_down = true;
            state.epoch += 1;
            state.reset_sync();
            state.fetch = FetchPhase::Idle;
        });
        if let Some(follower) = self.follower().take() {
            follower.abort();
        }
        info!("Cart engine shut down");
    }

    /// Run `f` under the state lock and publish the resulting snapshot.
    pub(crate) fn update<O>(&self, f: impl FnOnce(&mut EngineState) -> O) -> O {
        let mut state = self.lock();
        let out = f(&mut state);
        self.inner.snapshots.send_replace(state.snapshot());
        out
    }

    /// Read state without publishing.
    pub(crate) fn read<O>(&self, f: impl FnOnce(&EngineState) -> O) -> O {
        f(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn follower(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner.follower.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn remote(&self) -> &R {
        &self.inner.remote
    }

    /// Deadline for one token + remote call round-trip started now.
    pub(crate) fn deadline(&self) -> Instant {
        Instant::now() + self.inner.config.request_timeout
    }

    pub(crate) async fn token_before(&self, deadline: Instant) -> Result<AccessToken> {
        timeout_at(deadline, self.inner.tokens.access_token())
            .await
            .map_err(|_| CartError::Timeout(self.inner.config.request_timeout))?
            .map_err(CartError::from)
    }

    pub(crate) async fn remote_before<O>(
        &self,
        deadline: Instant,
        call: impl Future<Output = std::result::Result<O, RemoteError>>,
    ) -> Result<O> {
        timeout_at(deadline, call)
            .await
            .map_err(|_| CartError::Timeout(self.inner.config.request_timeout))?
            .map_err(CartError::from)
    }

    /// Obtain a token and make one remote call, both under one deadline.
    ///
    /// The call is only made if the identity epoch is still `epoch` once the
    /// token arrives; a token issued after a user switch belongs to the new
    /// user.
    pub(crate) async fn call_remote<O, F, Fut>(&self, epoch: u64, call: F) -> Result<O>
    where
        F: FnOnce(AccessToken) -> Fut,
        Fut: Future<Output = std::result::Result<O, RemoteError>>,
    {
        let deadline = self.deadline();
        let token = self.token_before(deadline).await?;
        self.read(|state| {
            if state.shut_down {
                return Err(CartError::ShutDown);
            }
            if state.epoch != epoch {
                debug!("Identity changed while waiting for a token; call dropped");
                return Err(CartError::IdentityChanged);
            }
            Ok(())
        })?;
        self.remote_before(deadline, call(token)).await
    }
}

impl<R, T> std::fmt::Debug for CartEngine<R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartEngine")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
