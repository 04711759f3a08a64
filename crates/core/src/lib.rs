//! Cart Sync Core - Shared cart types.
//!
//! This crate provides the data model shared by:
//! - `cart-sync-engine` - Replica store, identity gate, fetch/mutation/sync processes
//! - `cart-sync-cli` - Command-line driver against a remote cart service
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no runtime.
//! This keeps it lightweight and allows UI or checkout code to depend on the
//! cart's read contract without pulling in the engine.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, decimal prices, cart lines and derived totals

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
