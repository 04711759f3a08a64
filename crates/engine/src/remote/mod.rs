//! Remote cart service boundary.
//!
//! # Architecture
//!
//! - The remote service is the eventual source of truth; the engine keeps a
//!   local replica and talks to the service through [`CartRemote`]
//! - [`HttpCartRemote`] is the reference transport (bearer-token JSON over HTTP)
//! - Tests and embedders may supply any other implementation
//!
//! # Operations
//!
//! | Operation           | Purpose                                         |
//! |---------------------|-------------------------------------------------|
//! | `read_cart`         | Full authoritative cart for the token's user    |
//! | `add_line`          | Add one unit; the server owns the resulting qty |
//! | `set_line_quantity` | Targeted quantity update                        |
//! | `delete_line`       | Targeted line removal                           |
//! | `delete_all`        | Empty the cart                                  |
//! | `reconcile`         | Declarative full-state push (sync process only) |

mod http;
pub(crate) mod wire;

use std::future::Future;
use std::num::NonZeroU32;

use cart_sync_core::{CartLine, LineQuantity, ProductId};
use thiserror::Error;

use crate::identity::AccessToken;

pub use http::HttpCartRemote;

/// Errors that can occur when talking to the remote cart service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("HTTP {status}: {}", truncate_body(.body))]
    Status { status: u16, body: String },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The payload parsed but could not be mapped into cart lines.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Rate limited by the service.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// No connection to the service could be established.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// An endpoint path could not be joined onto the base URL.
    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

impl RemoteError {
    /// Whether the failure came from a malformed response rather than the
    /// transport.
    #[must_use]
    pub const fn is_invalid_response(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::InvalidPayload(_))
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(200).collect()
}

/// The remote cart service, as consumed by the engine.
///
/// Every call carries the caller's access token. Implementations must be
/// idempotent for `reconcile`: pushing the same lines twice leaves the same
/// remote state as pushing them once.
pub trait CartRemote: Send + Sync + 'static {
    /// Read the full cart.
    fn read_cart(
        &self,
        token: &AccessToken,
    ) -> impl Future<Output = Result<Vec<CartLine>, RemoteError>> + Send;

    /// Add one unit of a product.
    fn add_line(
        &self,
        token: &AccessToken,
        product_id: ProductId,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Set a line's quantity.
    fn set_line_quantity(
        &self,
        token: &AccessToken,
        product_id: ProductId,
        quantity: NonZeroU32,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Delete one line.
    fn delete_line(
        &self,
        token: &AccessToken,
        product_id: ProductId,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Delete every line.
    fn delete_all(&self, token: &AccessToken)
    -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Replace the remote cart with exactly these quantities.
    fn reconcile(
        &self,
        token: &AccessToken,
        lines: &[LineQuantity],
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
