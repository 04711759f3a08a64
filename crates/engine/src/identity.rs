//! Identity capability and the identity gate.
//!
//! The engine never acquires credentials itself. It consumes:
//! - an [`IdentityState`] stream (`ready` + optional user), pushed in by the
//!   composition root, and
//! - a [`TokenProvider`] that yields a bearer token for the current user.
//!
//! [`decide`] is the gate: a pure function from the identity state and the
//! replica's load status to what the engine should do next.

use std::future::Future;

use cart_sync_core::UserKey;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Errors from the token capability.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token is available for the current user.
    #[error("No access token available")]
    NoAccessToken,

    /// The token provider failed.
    #[error("Token provider failed: {0}")]
    Provider(String),
}

/// Identity capability state as last reported.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentityState {
    /// Whether the identity capability finished its own initialization.
    pub ready: bool,
    /// The signed-in user, if any.
    pub user: Option<UserKey>,
}

impl IdentityState {
    /// The capability is still initializing.
    #[must_use]
    pub const fn pending() -> Self {
        Self {
            ready: false,
            user: None,
        }
    }

    /// Initialized with nobody signed in.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self {
            ready: true,
            user: None,
        }
    }

    /// Initialized with `user` signed in.
    #[must_use]
    pub fn signed_in(user: impl Into<UserKey>) -> Self {
        Self {
            ready: true,
            user: Some(user.into()),
        }
    }

    /// The active user, only once the capability is ready.
    #[must_use]
    pub fn active_user(&self) -> Option<&UserKey> {
        self.user.as_ref().filter(|_| self.ready)
    }
}

/// Bearer token for the remote cart service.
///
/// Implements `Debug` manually to redact the secret.
#[derive(Clone)]
pub struct AccessToken(SecretString);

impl AccessToken {
    #[must_use]
    pub const fn new(token: SecretString) -> Self {
        Self(token)
    }

    /// The raw token, for building an `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<&str> for AccessToken {
    fn from(token: &str) -> Self {
        Self(SecretString::from(token))
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Async token capability of the identity provider.
pub trait TokenProvider: Send + Sync + 'static {
    /// Obtain a token for the current user.
    fn access_token(&self) -> impl Future<Output = Result<AccessToken, AuthError>> + Send;
}

/// Token provider that always hands out one configured token.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    #[must_use]
    pub const fn new(token: SecretString) -> Self {
        Self {
            token: AccessToken::new(token),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<AccessToken, AuthError> {
        if self.token.expose().is_empty() {
            return Err(AuthError::NoAccessToken);
        }
        Ok(self.token.clone())
    }
}

/// What the identity gate wants done after an identity transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Capability not ready yet. Change nothing; the engine reports busy.
    Wait,
    /// Fetch the cart of this user.
    Fetch(UserKey),
    /// Nobody is signed in: empty the replica and mark it loaded.
    Clear,
    /// The replica already holds this user's cart.
    Hold,
}

/// Decide the gate outcome for an identity transition.
///
/// Only identity transitions call this; load status is an input, never a
/// trigger, so fetch completion cannot re-enter the gate.
#[must_use]
pub fn decide(identity: &IdentityState, loaded: bool, last_fetched: Option<&UserKey>) -> GateDecision {
    if !identity.ready {
        return GateDecision::Wait;
    }
    match &identity.user {
        None => GateDecision::Clear,
        Some(user) if !loaded || last_fetched != Some(user) => GateDecision::Fetch(user.clone()),
        Some(_) => GateDecision::Hold,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_waits() {
        let identity = IdentityState {
            ready: false,
            user: Some(UserKey::new("u1")),
        };
        assert_eq!(decide(&identity, false, None), GateDecision::Wait);
        assert_eq!(decide(&IdentityState::pending(), true, None), GateDecision::Wait);
    }

    #[test]
    fn test_signed_out_clears() {
        let last = UserKey::new("u1");
        assert_eq!(decide(&IdentityState::signed_out(), true, Some(&last)), GateDecision::Clear);
        assert_eq!(decide(&IdentityState::signed_out(), false, None), GateDecision::Clear);
    }

    #[test]
    fn test_first_identity_fetches() {
        assert_eq!(
            decide(&IdentityState::signed_in("u1"), false, None),
            GateDecision::Fetch(UserKey::new("u1"))
        );
    }

    #[test]
    fn test_identity_switch_fetches() {
        let previous = UserKey::new("u1");
        assert_eq!(
            decide(&IdentityState::signed_in("u2"), true, Some(&previous)),
            GateDecision::Fetch(UserKey::new("u2"))
        );
    }

    #[test]
    fn test_loaded_identity_holds() {
        let current = UserKey::new("u1");
        assert_eq!(
            decide(&IdentityState::signed_in("u1"), true, Some(&current)),
            GateDecision::Hold
        );
    }

    #[test]
    fn test_same_identity_not_loaded_refetches() {
        let current = UserKey::new("u1");
        assert_eq!(
            decide(&IdentityState::signed_in("u1"), false, Some(&current)),
            GateDecision::Fetch(UserKey::new("u1"))
        );
    }

    #[test]
    fn test_active_user_requires_ready() {
        let identity = IdentityState {
            ready: false,
            user: Some(UserKey::new("u1")),
        };
        assert!(identity.active_user().is_none());
        assert_eq!(
            IdentityState::signed_in("u1").active_user(),
            Some(&UserKey::new("u1"))
        );
    }

    #[test]
    fn test_access_token_debug_redacts() {
        let token = AccessToken::from("super_secret_bearer");
        let debug_output = format!("{token:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_bearer"));
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticTokenProvider::new(SecretString::from("abc"));
        assert_eq!(provider.access_token().await.unwrap().expose(), "abc");

        let empty = StaticTokenProvider::new(SecretString::from(""));
        assert!(matches!(
            empty.access_token().await,
            Err(AuthError::NoAccessToken)
        ));
    }
}
