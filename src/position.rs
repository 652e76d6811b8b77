// 4.0: position record plus the pure merge/close math. the ledger owns persistence,
// everything here works on values.
// 4.1 merge math, 4.2 close settlement are at the bottom.

use crate::pricing::{self, Pnl};
use crate::types::{Leverage, PositionId, Price, Quote, Side, Symbol, Timestamp, UserId};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub leverage: Leverage,
    pub margin: Quote,
    pub entry_price: Price,
    pub liquidation_price: Option<Price>,
    pub take_profit: Option<Price>,
    pub stop_loss: Option<Price>,
    pub close_price: Option<Price>,
    pub realized_pnl: Option<Quote>,
    pub status: PositionStatus,
    pub created_at: Timestamp,
    pub closed_at: Option<Timestamp>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn notional(&self) -> Quote {
        Quote::new(pricing::notional(self.margin.value(), self.leverage.value()))
    }

    pub fn unrealized_pnl(&self, mark_price: Price) -> Pnl {
        pricing::unrealized_pnl(
            self.side,
            self.entry_price.value(),
            self.leverage.value(),
            self.margin.value(),
            mark_price.value(),
        )
    }

    pub fn has_tp_sl(&self) -> bool {
        self.take_profit.is_some() || self.stop_loss.is_some()
    }
}

/// Liquidation price as stored on a row. `None` when the formula gives 0
/// (a 1x long cannot be liquidated).
pub fn derive_liquidation_price(side: Side, entry_price: Price, leverage: Leverage) -> Option<Price> {
    Price::new(pricing::liquidation_price(side, entry_price.value(), leverage.value()))
}

/// A position that has not been persisted yet. storage assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPosition {
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub leverage: Leverage,
    pub margin: Quote,
    pub entry_price: Price,
    pub liquidation_price: Option<Price>,
    pub take_profit: Option<Price>,
    pub stop_loss: Option<Price>,
    pub created_at: Timestamp,
}

impl NewPosition {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: UserId,
        symbol: Symbol,
        side: Side,
        leverage: Leverage,
        margin: Quote,
        entry_price: Price,
        take_profit: Option<Price>,
        stop_loss: Option<Price>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            user_id,
            symbol,
            side,
            leverage,
            margin,
            entry_price,
            liquidation_price: derive_liquidation_price(side, entry_price, leverage),
            take_profit,
            stop_loss,
            created_at: timestamp,
        }
    }

    pub fn into_position(self, id: PositionId) -> Position {
        Position {
            id,
            user_id: self.user_id,
            symbol: self.symbol,
            side: self.side,
            leverage: self.leverage,
            margin: self.margin,
            entry_price: self.entry_price,
            liquidation_price: self.liquidation_price,
            take_profit: self.take_profit,
            stop_loss: self.stop_loss,
            close_price: None,
            realized_pnl: None,
            status: PositionStatus::Open,
            created_at: self.created_at,
            closed_at: None,
        }
    }
}

/// Partial update for a stored position. `None` leaves a field untouched;
/// the nested options on nullable columns let a patch clear them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionPatch {
    pub leverage: Option<Leverage>,
    pub margin: Option<Quote>,
    pub entry_price: Option<Price>,
    pub liquidation_price: Option<Option<Price>>,
    pub take_profit: Option<Option<Price>>,
    pub stop_loss: Option<Option<Price>>,
    pub close_price: Option<Option<Price>>,
    pub realized_pnl: Option<Option<Quote>>,
    pub status: Option<PositionStatus>,
    pub closed_at: Option<Option<Timestamp>>,
}

impl PositionPatch {
    pub fn apply(&self, position: &mut Position) {
        if let Some(leverage) = self.leverage {
            position.leverage = leverage;
        }
        if let Some(margin) = self.margin {
            position.margin = margin;
        }
        if let Some(entry) = self.entry_price {
            position.entry_price = entry;
        }
        if let Some(liq) = self.liquidation_price {
            position.liquidation_price = liq;
        }
        if let Some(tp) = self.take_profit {
            position.take_profit = tp;
        }
        if let Some(sl) = self.stop_loss {
            position.stop_loss = sl;
        }
        if let Some(close) = self.close_price {
            position.close_price = close;
        }
        if let Some(pnl) = self.realized_pnl {
            position.realized_pnl = pnl;
        }
        if let Some(status) = self.status {
            position.status = status;
        }
        if let Some(closed_at) = self.closed_at {
            position.closed_at = closed_at;
        }
    }

    /// Terminal close: status, close price, pnl, timestamp.
    pub fn close(close_price: Price, realized_pnl: Quote, timestamp: Timestamp) -> Self {
        Self {
            close_price: Some(Some(close_price)),
            realized_pnl: Some(Some(realized_pnl)),
            status: Some(PositionStatus::Closed),
            closed_at: Some(Some(timestamp)),
            ..Default::default()
        }
    }

    /// Undo of `close`, used when the balance credit after a close fails.
    pub fn reopen() -> Self {
        Self {
            close_price: Some(None),
            realized_pnl: Some(None),
            status: Some(PositionStatus::Open),
            closed_at: Some(None),
            ..Default::default()
        }
    }
}

// 4.1: merge of a same-direction leg into an open position.
// legs are weighted by notional (margin * leverage), so two legs of equal
// notional average to the midpoint of their prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedLegs {
    pub entry_price: Price,
    pub margin: Quote,
    pub leverage: Leverage,
    pub liquidation_price: Option<Price>,
}

impl MergedLegs {
    pub fn as_patch(&self) -> PositionPatch {
        PositionPatch {
            leverage: Some(self.leverage),
            margin: Some(self.margin),
            entry_price: Some(self.entry_price),
            liquidation_price: Some(self.liquidation_price),
            ..Default::default()
        }
    }
}

/// `None` when the combined legs overflow decimal range.
pub fn merge_legs(
    position: &Position,
    leverage: Leverage,
    margin: Quote,
    fill_price: Price,
) -> Option<MergedLegs> {
    let old_notional = position.margin.value().checked_mul(position.leverage.value())?;
    let new_notional = margin.value().checked_mul(leverage.value())?;
    let total_notional = old_notional.checked_add(new_notional)?;

    let weighted = old_notional
        .checked_mul(position.entry_price.value())?
        .checked_add(new_notional.checked_mul(fill_price.value())?)?;
    let entry_price = weighted.checked_div(total_notional).and_then(Price::new)?;

    let merged_margin = position.margin.checked_add(margin)?;

    // whole-number leverage, half rounds up like the UI shows it
    let merged_leverage = total_notional
        .checked_div(merged_margin.value())
        .map(|l| l.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|l| l.to_u32())
        .and_then(Leverage::new)
        .unwrap_or(position.leverage);

    Some(MergedLegs {
        entry_price,
        margin: merged_margin,
        leverage: merged_leverage,
        liquidation_price: derive_liquidation_price(position.side, entry_price, merged_leverage),
    })
}

// 4.2: what the balance gets back on close. losses stop at the margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSettlement {
    pub pnl: Quote,
    pub fee: Quote,
    pub returned: Quote,
}

pub fn settle_close(position: &Position, close_price: Price, taker_fee_rate: Decimal) -> CloseSettlement {
    let pnl = Quote::new(position.unrealized_pnl(close_price).pnl);
    let fee = Quote::new(pricing::fee(
        position.margin.value(),
        position.leverage.value(),
        taker_fee_rate,
    ));
    let returned = position.margin.add(pnl).sub(fee).max(Quote::zero());

    CloseSettlement { pnl, fee, returned }
}
