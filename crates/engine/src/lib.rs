//! Cart synchronization engine.
//!
//! Keeps a local replica of a user's cart consistent with a remote cart
//! service:
//!
//! - the identity gate decides when to fetch and when to clear
//! - commands apply optimistically and roll back when the remote rejects them
//! - a debounced background sync pushes the whole replica declaratively
//!
//! UI and checkout code read [`CartSnapshot`]s; they never touch the
//! replica directly.
//!
//! # Example
//!
//! ```rust,ignore
//! use cart_sync_engine::{CartEngine, CartSyncConfig, HttpCartRemote, IdentityState, StaticTokenProvider};
//!
//! let config = CartSyncConfig::from_env()?;
//! let remote = HttpCartRemote::new(config.remote.base_url.clone(), config.engine.request_timeout)?;
//! let engine = CartEngine::new(config.engine, remote, StaticTokenProvider::new(config.remote.api_token));
//! engine.set_identity(IdentityState::signed_in(config.remote.user));
//! let snapshot = engine.settled().await;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
mod engine;
pub mod error;
pub mod identity;
pub mod remote;
pub mod replica;

pub use config::{CartSyncConfig, ConfigError, EngineConfig, RemoteConfig};
pub use engine::{CartEngine, CartSnapshot, SyncStatus};
pub use error::CartError;
pub use identity::{AccessToken, AuthError, IdentityState, StaticTokenProvider, TokenProvider};
pub use remote::{CartRemote, HttpCartRemote, RemoteError};
pub use replica::Replica;
