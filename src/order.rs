//! Resting limit orders.
//!
//! A limit order reserves margin plus its maker fee at submission. It either
//! fills into a position when the market reaches the limit price, or gets
//! cancelled and refunds the full reservation. Both outcomes are terminal.

use crate::types::{Leverage, OrderId, Price, Quote, Side, Symbol, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Order lifecycle: Pending -> Filled | Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// A limit order as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub id: OrderId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub leverage: Leverage,
    pub margin: Quote,
    pub limit_price: Price,
    pub take_profit: Option<Price>,
    pub stop_loss: Option<Price>,
    /// Maker fee charged up front and held with the margin.
    pub fee: Quote,
    pub status: OrderStatus,
    pub created_at: Timestamp,
}

impl PendingOrder {
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    /// Total amount held against the balance while pending.
    pub fn reserved(&self) -> Quote {
        self.margin.add(self.fee)
    }

    /// A long fills once price comes down to the limit, a short once it rises to it.
    pub fn should_fill(&self, price: Price) -> bool {
        match self.side {
            Side::Long => price <= self.limit_price,
            Side::Short => price >= self.limit_price,
        }
    }
}

/// An order before storage assigns its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub leverage: Leverage,
    pub margin: Quote,
    pub limit_price: Price,
    pub take_profit: Option<Price>,
    pub stop_loss: Option<Price>,
    pub fee: Quote,
    pub created_at: Timestamp,
}

impl NewOrder {
    pub fn into_order(self, id: OrderId) -> PendingOrder {
        PendingOrder {
            id,
            user_id: self.user_id,
            symbol: self.symbol,
            side: self.side,
            leverage: self.leverage,
            margin: self.margin,
            limit_price: self.limit_price,
            take_profit: self.take_profit,
            stop_loss: self.stop_loss,
            fee: self.fee,
            status: OrderStatus::Pending,
            created_at: self.created_at,
        }
    }
}

/// Partial update for a stored order. only the status ever changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
}

impl OrderPatch {
    pub fn status(status: OrderStatus) -> Self {
        Self { status: Some(status) }
    }

    pub fn apply(&self, order: &mut PendingOrder) {
        if let Some(status) = self.status {
            order.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit(side: Side, price: rust_decimal::Decimal) -> PendingOrder {
        NewOrder {
            user_id: UserId(7),
            symbol: Symbol::new("btcusdt"),
            side,
            leverage: Leverage::new(10).unwrap(),
            margin: Quote::new(dec!(100)),
            limit_price: Price::new_unchecked(price),
            take_profit: None,
            stop_loss: None,
            fee: Quote::new(dec!(0.2)),
            created_at: Timestamp::from_millis(0),
        }
        .into_order(OrderId(1))
    }

    #[test]
    fn long_limit_fills_at_or_below() {
        let order = limit(Side::Long, dec!(48000));
        assert!(!order.should_fill(Price::new_unchecked(dec!(48000.01))));
        assert!(order.should_fill(Price::new_unchecked(dec!(48000))));
        assert!(order.should_fill(Price::new_unchecked(dec!(47000))));
    }

    #[test]
    fn short_limit_fills_at_or_above() {
        let order = limit(Side::Short, dec!(52000));
        assert!(!order.should_fill(Price::new_unchecked(dec!(51999))));
        assert!(order.should_fill(Price::new_unchecked(dec!(52000))));
    }

    #[test]
    fn reservation_is_margin_plus_fee() {
        let order = limit(Side::Long, dec!(48000));
        assert_eq!(order.reserved().value(), dec!(100.2));
        assert!(order.is_pending());
    }

    #[test]
    fn patch_moves_status() {
        let mut order = limit(Side::Long, dec!(48000));
        OrderPatch::status(OrderStatus::Cancelled).apply(&mut order);
        assert!(order.status.is_terminal());
        assert!(!order.is_pending());
    }
}
