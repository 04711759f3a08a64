//! Command-boundary error type.
//!
//! Every public engine command returns `Result<(), CartError>` as its
//! completion signal and also records the failure's message as the engine's
//! `last_error`, so a UI can render state without handling the result.

use std::time::Duration;

use thiserror::Error;

use crate::identity::AuthError;
use crate::remote::RemoteError;

/// Failure of a cart command or background process.
#[derive(Debug, Error)]
pub enum CartError {
    /// A command that needs a signed-in user ran without one.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Token retrieval failed.
    #[error("Authentication failed: {0}")]
    AuthFailure(#[from] AuthError),

    /// The remote call was rejected or the service was unreachable.
    #[error("Network failure: {0}")]
    NetworkFailure(RemoteError),

    /// The remote answered with a payload that could not be used.
    #[error("Invalid response: {0}")]
    InvalidResponse(RemoteError),

    /// The token and remote round-trip did not finish in time.
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The signed-in user changed before the remote call went out, so it
    /// was never sent.
    #[error("Signed-in user changed; request not sent")]
    IdentityChanged,

    /// The engine was shut down.
    #[error("Cart engine is shut down")]
    ShutDown,
}

impl From<RemoteError> for CartError {
    fn from(err: RemoteError) -> Self {
        if err.is_invalid_response() {
            Self::InvalidResponse(err)
        } else {
            Self::NetworkFailure(err)
        }
    }
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_error_display() {
        assert_eq!(CartError::NotAuthenticated.to_string(), "Not authenticated");
        assert_eq!(
            CartError::Timeout(Duration::from_secs(10)).to_string(),
            "Request timed out after 10000ms"
        );
        assert_eq!(
            CartError::from(AuthError::NoAccessToken).to_string(),
            "Authentication failed: No access token available"
        );
    }

    #[test]
    fn test_remote_error_classification() {
        let err = CartError::from(RemoteError::InvalidPayload("price".to_string()));
        assert!(matches!(err, CartError::InvalidResponse(_)));

        let err = CartError::from(RemoteError::Unavailable("connection refused".to_string()));
        assert!(matches!(err, CartError::NetworkFailure(_)));
        assert_eq!(
            err.to_string(),
            "Network failure: Service unavailable: connection refused"
        );

        let err = CartError::from(RemoteError::Endpoint(url::ParseError::EmptyHost));
        assert!(matches!(err, CartError::NetworkFailure(_)));
    }
}
