//! Frame normalization.
//!
//! Exchanges disagree on field names. A trade stream sends `p` and `T`, a
//! ticker sends `c` and `E`, a generic relay might send `price` and
//! `timestamp`. Prices may come as strings or numbers.

use super::FeedError;
use crate::types::{Price, Symbol, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

const PRICE_FIELDS: [&str; 3] = ["p", "price", "c"];
const TIME_FIELDS: [&str; 4] = ["T", "E", "timestamp", "ts"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: Symbol,
    pub price: Price,
    pub timestamp: Timestamp,
}

impl PriceTick {
    pub fn new(symbol: impl Into<Symbol>, price: Price, timestamp: Timestamp) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
        }
    }
}

/// Parse one raw text frame for `symbol`. A missing timestamp means now.
pub fn parse_tick(symbol: &Symbol, raw: &str) -> Result<PriceTick, FeedError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| FeedError::Malformed(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(FeedError::Malformed("expected a JSON object".to_string()));
    };

    let raw_price = PRICE_FIELDS
        .iter()
        .find_map(|name| fields.get(*name))
        .ok_or_else(|| FeedError::InvalidPrice("no price field".to_string()))?;
    let price = decimal_of(raw_price)
        .and_then(Price::new)
        .ok_or_else(|| FeedError::InvalidPrice(raw_price.to_string()))?;

    let timestamp = TIME_FIELDS
        .iter()
        .find_map(|name| fields.get(*name).and_then(millis_of))
        .map(Timestamp::from_millis)
        .unwrap_or_else(Timestamp::now);

    Ok(PriceTick {
        symbol: symbol.clone(),
        price,
        timestamp,
    })
}

fn decimal_of(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn millis_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
