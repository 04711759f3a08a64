//! Cart commands.
//!
//! Each command signs in as `CART_USER`, waits for the engine to load the
//! cart, applies the command, pushes any pending change and prints the
//! resulting cart.
//!
//! # Environment Variables
//!
//! - `CART_API_BASE_URL` - Base URL of the remote cart service
//! - `CART_API_TOKEN` - Bearer token for the service
//! - `CART_USER` - Identity key (default: default)

use cart_sync_core::ProductId;
use cart_sync_engine::{
    CartEngine, CartError, CartSnapshot, CartSyncConfig, ConfigError, HttpCartRemote,
    IdentityState, RemoteError, StaticTokenProvider,
};
use thiserror::Error;
use tracing::info;

type Engine = CartEngine<HttpCartRemote, StaticTokenProvider>;

/// Errors that can occur while running a cart command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The HTTP client could not be built.
    #[error("Remote client error: {0}")]
    Remote(#[from] RemoteError),

    /// The cart command failed.
    #[error(transparent)]
    Cart(#[from] CartError),

    /// The initial fetch failed.
    #[error("Could not load cart: {0}")]
    Load(String),
}

/// Print the cart.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the cart cannot be loaded.
pub async fn show() -> Result<(), CliError> {
    let engine = open().await?;
    finish(&engine).await
}

/// Add one unit of a product.
///
/// # Errors
///
/// Returns an error if the add or the follow-up fetch fails.
pub async fn add(product_id: ProductId) -> Result<(), CliError> {
    let engine = open().await?;
    engine.add_or_increment(product_id).await?;
    finish(&engine).await
}

/// Set a product's quantity.
///
/// # Errors
///
/// Returns an error if the remote rejects the change.
pub async fn set(product_id: ProductId, quantity: i64) -> Result<(), CliError> {
    let engine = open().await?;
    engine.set_quantity(product_id, quantity).await?;
    finish(&engine).await
}

/// Remove a product.
///
/// # Errors
///
/// Returns an error if the remote rejects the removal.
pub async fn remove(product_id: ProductId) -> Result<(), CliError> {
    let engine = open().await?;
    engine.remove(product_id).await?;
    finish(&engine).await
}

/// Empty the cart.
///
/// # Errors
///
/// Returns an error if the remote rejects the clear.
pub async fn clear() -> Result<(), CliError> {
    let engine = open().await?;
    engine.clear().await?;
    finish(&engine).await
}

/// Build an engine from the environment and wait for the first load.
async fn open() -> Result<Engine, CliError> {
    let config = CartSyncConfig::from_env()?;
    info!(base_url = %config.remote.base_url, user = %config.remote.user, "Connecting to cart service");

    let remote = HttpCartRemote::new(config.remote.base_url.clone(), config.engine.request_timeout)?;
    let tokens = StaticTokenProvider::new(config.remote.api_token);
    let engine = CartEngine::new(config.engine, remote, tokens);
    engine.set_identity(IdentityState::signed_in(config.remote.user));

    let snapshot = engine.settled().await;
    if let Some(error) = snapshot.last_error {
        engine.shutdown();
        return Err(CliError::Load(error));
    }
    Ok(engine)
}

/// Push anything still pending, print the cart and stop the engine.
async fn finish(engine: &Engine) -> Result<(), CliError> {
    let flushed = engine.flush().await;
    let snapshot = engine.settled().await;
    engine.shutdown();
    flushed?;
    print_cart(&snapshot);
    Ok(())
}

fn print_cart(snapshot: &CartSnapshot) {
    if snapshot.lines.is_empty() {
        info!("Cart is empty");
        return;
    }
    info!("{:<10} {:<28} {:<20} {:>5} {:>10}", "PRODUCT", "NAME", "STORE", "QTY", "TOTAL");
    for line in &snapshot.lines {
        info!(
            "{:<10} {:<28} {:<20} {:>5} {:>10}",
            line.product_id.as_i64(),
            line.product_name,
            line.store_name,
            line.quantity,
            line.line_total()
        );
    }
    info!(
        items = snapshot.total_items,
        total = %snapshot.total_price,
        "Cart total"
    );
}
