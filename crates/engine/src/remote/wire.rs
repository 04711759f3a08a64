//! JSON wire format of the remote cart service and its mapping into
//! [`CartLine`]s.

use std::num::NonZeroU32;
use std::str::FromStr;

use cart_sync_core::{
    CartLine, LineQuantity, Price, ProductId, RemoteLineId, StoreId, UNKNOWN_STORE_NAME,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::RemoteError;

const UNKNOWN_PRODUCT_NAME: &str = "Unknown Product";

/// Largest unit price accepted from the remote.
const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

/// Cart read response: either a bare array or `{ "items": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireCart {
    Lines(Vec<WireCartLine>),
    Wrapped { items: Vec<WireCartLine> },
}

/// One line as the remote sends it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireCartLine {
    #[serde(default)]
    pub id: Option<Value>,
    pub product_id: i64,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub store_id: Option<Value>,
    #[serde(default)]
    pub store_name: Option<String>,
    pub price: Value,
    pub quantity: i64,
    #[serde(default)]
    pub available_quantity: Option<i64>,
}

/// Body of `POST cart/items`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddLineBody {
    pub product_id: ProductId,
}

/// Body of `PUT cart/items/{productId}`.
#[derive(Debug, Serialize)]
pub(crate) struct SetQuantityBody {
    pub quantity: NonZeroU32,
}

/// Body of `PUT cart/sync`.
#[derive(Debug, Serialize)]
pub(crate) struct ReconcileBody<'a> {
    pub items: &'a [LineQuantity],
}

/// Parse a cart read response body.
pub(crate) fn parse_cart(body: &str) -> Result<Vec<CartLine>, RemoteError> {
    let cart: WireCart = serde_json::from_str(body)?;
    let lines = match cart {
        WireCart::Lines(lines) | WireCart::Wrapped { items: lines } => lines,
    };
    convert_lines(lines)
}

/// Map raw lines into cart lines.
///
/// Lines with a non-positive quantity cannot exist in the replica and are
/// dropped. A price that is not a decimal, or is larger than any real unit
/// price, rejects the whole payload.
pub(crate) fn convert_lines(lines: Vec<WireCartLine>) -> Result<Vec<CartLine>, RemoteError> {
    let mut converted = Vec::with_capacity(lines.len());
    for line in lines {
        if let Some(line) = convert_line(line)? {
            converted.push(line);
        }
    }
    Ok(converted)
}

fn convert_line(line: WireCartLine) -> Result<Option<CartLine>, RemoteError> {
    let Some(quantity) = u32::try_from(line.quantity).ok().and_then(NonZeroU32::new) else {
        warn!(
            product_id = line.product_id,
            quantity = line.quantity,
            "Dropping cart line with non-positive quantity"
        );
        return Ok(None);
    };

    let unit_price = parse_price(&line.price).ok_or_else(|| {
        RemoteError::InvalidPayload(format!(
            "product {} has invalid price {}",
            line.product_id, line.price
        ))
    })?;
    if unit_price.amount() > MAX_UNIT_PRICE {
        return Err(RemoteError::InvalidPayload(format!(
            "product {} price {} is out of range",
            line.product_id, line.price
        )));
    }

    Ok(Some(CartLine {
        product_id: ProductId::new(line.product_id),
        product_name: line
            .product_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| UNKNOWN_PRODUCT_NAME.to_string()),
        store_id: line
            .store_id
            .as_ref()
            .and_then(scalar_id)
            .map_or_else(StoreId::unknown, StoreId::new),
        store_name: line
            .store_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| UNKNOWN_STORE_NAME.to_string()),
        unit_price,
        quantity,
        available_quantity: line
            .available_quantity
            .map(|q| u32::try_from(q.max(0)).unwrap_or(u32::MAX)),
        remote_line_id: line.id.as_ref().and_then(scalar_id).map(RemoteLineId::new),
    }))
}

/// Accepts `10`, `10.5` or `"10.50"`.
fn parse_price(value: &Value) -> Option<Price> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
        .filter(|d| !d.is_sign_negative())
        .map(Price::new)
}

/// Non-empty string or non-zero number, rendered as a string.
fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) if n.as_f64().is_some_and(|f| f.abs() > f64::EPSILON) => Some(n.to_string()),
        _ => None,
    }
}
