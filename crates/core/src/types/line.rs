//! Cart line types.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use super::id::{ProductId, RemoteLineId, StoreId};
use super::price::Price;

/// Display name used when the remote omits a line's store name.
pub const UNKNOWN_STORE_NAME: &str = "Unknown Store";

/// One product's presence in the cart.
///
/// A line always holds at least one unit; a quantity of zero is represented
/// by the line being absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    /// Identity key, unique within a cart.
    pub product_id: ProductId,
    pub product_name: String,
    pub store_id: StoreId,
    pub store_name: String,
    /// Unit price snapshotted at fetch time.
    pub unit_price: Price,
    pub quantity: NonZeroU32,
    /// Advisory stock ceiling reported by the remote. Not enforced locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_quantity: Option<u32>,
    /// Absent for lines that never came back from a fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_line_id: Option<RemoteLineId>,
}

impl CartLine {
    /// Price of all units on this line.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.unit_price.times(self.quantity.get())
    }

    /// The `(product, quantity)` pair pushed during reconciliation.
    #[must_use]
    pub const fn quantity_pair(&self) -> LineQuantity {
        LineQuantity {
            product_id: self.product_id,
            quantity: self.quantity,
        }
    }
}

/// Desired quantity for one product in a full-cart reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineQuantity {
    pub product_id: ProductId,
    pub quantity: NonZeroU32,
}

/// Totals derived from a set of cart lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CartTotals {
    /// Sum of quantities across all lines.
    pub total_items: u64,
    /// Sum of `unit_price * quantity` across all lines.
    pub total_price: Price,
}

impl CartTotals {
    /// Compute totals for the given lines.
    #[must_use]
    pub fn from_lines(lines: &[CartLine]) -> Self {
        Self {
            total_items: lines.iter().map(|l| u64::from(l.quantity.get())).sum(),
            total_price: lines.iter().map(CartLine::line_total).sum(),
        }
    }
}
