//! In-memory replica of the cart.
//!
//! The replica owns the cart lines and enforces the two line invariants:
//! product IDs are unique, and every present line holds at least one unit.
//! It knows nothing about the network; the engine snapshots and restores it
//! around optimistic mutations.

use std::num::NonZeroU32;

use cart_sync_core::{CartLine, CartTotals, LineQuantity, ProductId};

/// Ordered set of cart lines keyed by product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replica {
    lines: Vec<CartLine>,
}

impl Replica {
    /// Lines in display order.
    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    #[must_use]
    pub fn get(&self, product_id: ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn totals(&self) -> CartTotals {
        CartTotals::from_lines(&self.lines)
    }

    /// Full desired state for a reconciliation push.
    #[must_use]
    pub fn quantities(&self) -> Vec<LineQuantity> {
        self.lines.iter().map(CartLine::quantity_pair).collect()
    }

    /// Replace every line.
    ///
    /// Repeated product IDs collapse into the first occurrence with their
    /// quantities summed.
    pub fn replace(&mut self, lines: Vec<CartLine>) {
        self.lines.clear();
        for line in lines {
            match self.lines.iter_mut().find(|l| l.product_id == line.product_id) {
                Some(existing) => {
                    existing.quantity = existing.quantity.saturating_add(line.quantity.get());
                }
                None => self.lines.push(line),
            }
        }
    }

    /// Set a line's quantity. Returns `false` if the product is not in the
    /// cart.
    pub fn set_quantity(&mut self, product_id: ProductId, quantity: NonZeroU32) -> bool {
        match self.lines.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => {
                line.quantity = quantity;
                true
            }
            None => false,
        }
    }

    /// Remove a line, returning it if it was present.
    pub fn remove(&mut self, product_id: ProductId) -> Option<CartLine> {
        let index = self.lines.iter().position(|l| l.product_id == product_id)?;
        Some(self.lines.remove(index))
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}
