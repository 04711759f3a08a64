//! Core types for the cart sync engine.
//!
//! This module provides type-safe wrappers for cart domain concepts.

pub mod id;
pub mod line;
pub mod price;

pub use id::*;
pub use line::{CartLine, CartTotals, LineQuantity, UNKNOWN_STORE_NAME};
pub use price::Price;
