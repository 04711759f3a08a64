//! Integration test harness for the cart sync engine.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cart-sync-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `identity_gate` - fetch/clear decisions on identity transitions
//! - `mutations` - optimistic commands and rollback
//! - `debounce_sync` - debounced reconciliation
//! - `scenario` - end-to-end sessions
//!
//! The engine talks to [`FakeRemote`], an in-memory cart service that
//! records every call and can be told to fail, hang or answer late. Tests run
//! on Tokio's paused clock so debounce windows and timeouts are exact.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cart_sync_core::{CartLine, LineQuantity, Price, ProductId, StoreId};
use cart_sync_engine::{
    AccessToken, AuthError, CartEngine, CartRemote, EngineConfig, IdentityState, RemoteError,
    TokenProvider,
};
use rust_decimal::Decimal;

/// Engine wired to the fakes.
pub type TestEngine = CartEngine<FakeRemote, FakeTokens>;

/// Debounce window used by [`engine`].
pub const DEBOUNCE: Duration = Duration::from_millis(1500);

/// Round-trip bound used by [`engine`].
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Build an engine over the given fakes with the reference timings.
#[must_use]
pub fn engine(remote: &FakeRemote, tokens: &FakeTokens) -> TestEngine {
    let config = EngineConfig::default()
        .with_sync_debounce(DEBOUNCE)
        .with_request_timeout(TIMEOUT);
    CartEngine::new(config, remote.clone(), tokens.clone())
}

/// User signed in by [`signed_in`].
pub const USER: &str = "shopper-1";

/// Build an engine, sign [`USER`] in and wait for the first fetch.
pub async fn signed_in(remote: &FakeRemote, tokens: &FakeTokens) -> TestEngine {
    let engine = engine(remote, tokens);
    engine.set_identity(IdentityState::signed_in(USER));
    engine.settled().await;
    engine
}

/// A cart line as the service would report it.
///
/// # Panics
///
/// Panics if `price` is not a decimal or `quantity` is zero.
#[must_use]
pub fn line(id: i64, name: &str, price: &str, quantity: u32) -> CartLine {
    CartLine {
        product_id: ProductId::new(id),
        product_name: name.to_string(),
        store_id: StoreId::new("7"),
        store_name: "Corner Shop".to_string(),
        unit_price: Price::new(Decimal::from_str(price).unwrap_or_else(|e| panic!("{e}"))),
        quantity: NonZeroU32::new(quantity).unwrap_or_else(|| panic!("zero quantity")),
        available_quantity: None,
        remote_line_id: None,
    }
}

/// Let spawned engine tasks run without moving the clock.
pub async fn run_pending_tasks() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Fake remote
// =============================================================================

/// Remote operations, for call logs and behaviour overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Read,
    Add,
    SetQuantity,
    Delete,
    DeleteAll,
    Reconcile,
}

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Read,
    Add(ProductId),
    SetQuantity(ProductId, u32),
    Delete(ProductId),
    DeleteAll,
    Reconcile(Vec<(ProductId, u32)>),
}

impl Call {
    #[must_use]
    pub const fn op(&self) -> Op {
        match self {
            Self::Read => Op::Read,
            Self::Add(_) => Op::Add,
            Self::SetQuantity(..) => Op::SetQuantity,
            Self::Delete(_) => Op::Delete,
            Self::DeleteAll => Op::DeleteAll,
            Self::Reconcile(_) => Op::Reconcile,
        }
    }
}

/// How an operation misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Answer with `503 Service Unavailable`.
    Fail,
    /// Never answer.
    Hang,
    /// Answer normally after a delay.
    Delay(Duration),
}

/// In-memory cart service.
#[derive(Clone, Default)]
pub struct FakeRemote {
    inner: Arc<Mutex<FakeRemoteState>>,
}

#[derive(Default)]
struct FakeRemoteState {
    cart: Vec<CartLine>,
    catalog: HashMap<ProductId, CartLine>,
    calls: Vec<Call>,
    behaviors: HashMap<Op, Behavior>,
}

impl FakeRemote {
    /// A service whose cart already holds `lines`. Each line is also added to
    /// the catalog.
    #[must_use]
    pub fn with_cart(lines: Vec<CartLine>) -> Self {
        let remote = Self::default();
        remote.replace_cart(lines);
        remote
    }

    /// Overwrite the server-side cart, as another device would.
    pub fn replace_cart(&self, lines: Vec<CartLine>) {
        let mut state = self.state();
        for line in &lines {
            state.catalog.insert(line.product_id, line.clone());
        }
        state.cart = lines;
    }

    /// Make `line` available for `add_line`.
    pub fn stock(&self, line: CartLine) {
        self.state().catalog.insert(line.product_id, line);
    }

    pub fn set_behavior(&self, op: Op, behavior: Behavior) {
        self.state().behaviors.insert(op, behavior);
    }

    pub fn heal(&self, op: Op) {
        self.state().behaviors.remove(&op);
    }

    /// Current server-side cart as `(product, quantity)` pairs.
    #[must_use]
    pub fn cart(&self) -> Vec<(ProductId, u32)> {
        self.state()
            .cart
            .iter()
            .map(|l| (l.product_id, l.quantity.get()))
            .collect()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    #[must_use]
    pub fn count(&self, op: Op) -> usize {
        self.state().calls.iter().filter(|c| c.op() == op).count()
    }

    fn state(&self) -> MutexGuard<'_, FakeRemoteState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call and apply its behaviour override.
    async fn enter(&self, call: Call) -> Result<(), RemoteError> {
        let behavior = {
            let mut state = self.state();
            let op = call.op();
            state.calls.push(call);
            state.behaviors.get(&op).copied()
        };
        match behavior {
            None => Ok(()),
            Some(Behavior::Fail) => Err(RemoteError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            }),
            Some(Behavior::Hang) => std::future::pending().await,
            Some(Behavior::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn not_found(product_id: ProductId) -> RemoteError {
        RemoteError::Status {
            status: 404,
            body: format!("no product {product_id}"),
        }
    }
}

impl CartRemote for FakeRemote {
    async fn read_cart(&self, _token: &AccessToken) -> Result<Vec<CartLine>, RemoteError> {
        // Delays model response latency: the answer is the cart at request time.
        let cart = self.state().cart.clone();
        self.enter(Call::Read).await?;
        Ok(cart)
    }

    async fn add_line(&self, _token: &AccessToken, product_id: ProductId) -> Result<(), RemoteError> {
        self.enter(Call::Add(product_id)).await?;
        let mut state = self.state();
        if let Some(line) = state.cart.iter_mut().find(|l| l.product_id == product_id) {
            // Stock clamps the quantity server-side.
            let cap = line.available_quantity.unwrap_or(u32::MAX);
            if line.quantity.get() < cap {
                line.quantity = line.quantity.saturating_add(1);
            }
            return Ok(());
        }
        let mut line = state
            .catalog
            .get(&product_id)
            .cloned()
            .ok_or_else(|| Self::not_found(product_id))?;
        line.quantity = NonZeroU32::MIN;
        state.cart.push(line);
        Ok(())
    }

    async fn set_line_quantity(
        &self,
        _token: &AccessToken,
        product_id: ProductId,
        quantity: NonZeroU32,
    ) -> Result<(), RemoteError> {
        self.enter(Call::SetQuantity(product_id, quantity.get())).await?;
        let mut state = self.state();
        let line = state
            .cart
            .iter_mut()
            .find(|l| l.product_id == product_id)
            .ok_or_else(|| Self::not_found(product_id))?;
        line.quantity = quantity;
        Ok(())
    }

    async fn delete_line(&self, _token: &AccessToken, product_id: ProductId) -> Result<(), RemoteError> {
        self.enter(Call::Delete(product_id)).await?;
        self.state().cart.retain(|l| l.product_id != product_id);
        Ok(())
    }

    async fn delete_all(&self, _token: &AccessToken) -> Result<(), RemoteError> {
        self.enter(Call::DeleteAll).await?;
        self.state().cart.clear();
        Ok(())
    }

    async fn reconcile(&self, _token: &AccessToken, lines: &[LineQuantity]) -> Result<(), RemoteError> {
        self.enter(Call::Reconcile(
            lines.iter().map(|l| (l.product_id, l.quantity.get())).collect(),
        ))
        .await?;
        let mut state = self.state();
        let mut next = Vec::with_capacity(lines.len());
        for wanted in lines {
            let template = state
                .cart
                .iter()
                .find(|l| l.product_id == wanted.product_id)
                .or_else(|| state.catalog.get(&wanted.product_id))
                .cloned();
            if let Some(mut line) = template {
                line.quantity = wanted.quantity;
                next.push(line);
            }
        }
        state.cart = next;
        Ok(())
    }
}

// =============================================================================
// Fake tokens
// =============================================================================

/// Token capability whose answer can be switched at runtime.
#[derive(Clone)]
pub struct FakeTokens {
    inner: Arc<Mutex<FakeTokensState>>,
}

struct FakeTokensState {
    behavior: TokenBehavior,
    issued: usize,
}

/// What [`FakeTokens`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenBehavior {
    Issue,
    /// Issue after the given delay.
    Delay(Duration),
    Missing,
    Hang,
}

impl Default for FakeTokens {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeTokensState {
                behavior: TokenBehavior::Issue,
                issued: 0,
            })),
        }
    }
}

impl FakeTokens {
    pub fn set_behavior(&self, behavior: TokenBehavior) {
        self.state().behavior = behavior;
    }

    /// Tokens handed out so far.
    #[must_use]
    pub fn issued(&self) -> usize {
        self.state().issued
    }

    fn state(&self) -> MutexGuard<'_, FakeTokensState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenProvider for FakeTokens {
    async fn access_token(&self) -> Result<AccessToken, AuthError> {
        let behavior = self.state().behavior;
        match behavior {
            TokenBehavior::Issue => {
                self.state().issued += 1;
                Ok(AccessToken::from("test-token"))
            }
            TokenBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                self.state().issued += 1;
                Ok(AccessToken::from("test-token"))
            }
            TokenBehavior::Missing => Err(AuthError::NoAccessToken),
            TokenBehavior::Hang => std::future::pending().await,
        }
    }
}
