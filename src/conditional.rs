//! Exit triggers: liquidation, take-profit and stop-loss.
//!
//! Triggers are not stored as separate orders. They are read off the open
//! position on every tick: the liquidation price is derived from entry and
//! leverage, TP/SL are user supplied prices.

use crate::events::CloseReason;
use crate::position::Position;
use crate::types::{Price, Side};
use serde::{Deserialize, Serialize};

/// How the trigger price should be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerCondition {
    /// Triggers when price is at or above the trigger.
    Above,
    /// Triggers when price is at or below the trigger.
    Below,
}

impl TriggerCondition {
    pub fn is_met(&self, price: Price, trigger: Price) -> bool {
        match self {
            TriggerCondition::Above => price >= trigger,
            TriggerCondition::Below => price <= trigger,
        }
    }

    /// Adverse moves: down for longs, up for shorts. Liquidation and stop loss use this.
    pub fn adverse(side: Side) -> Self {
        match side {
            Side::Long => TriggerCondition::Below,
            Side::Short => TriggerCondition::Above,
        }
    }

    /// Favorable moves. Take profit uses this.
    pub fn favorable(side: Side) -> Self {
        match side {
            Side::Long => TriggerCondition::Above,
            Side::Short => TriggerCondition::Below,
        }
    }
}

/// True when `price` has reached the position's liquidation price.
pub fn liquidation_hit(position: &Position, price: Price) -> bool {
    position
        .liquidation_price
        .map(|liq| TriggerCondition::adverse(position.side).is_met(price, liq))
        .unwrap_or(false)
}

/// First TP/SL trigger met at `price`, with the price to close at.
/// TP wins if both are somehow met; for sane TP/SL that cannot happen.
pub fn tp_sl_hit(position: &Position, price: Price) -> Option<(CloseReason, Price)> {
    if let Some(tp) = position.take_profit {
        if TriggerCondition::favorable(position.side).is_met(price, tp) {
            return Some((CloseReason::TakeProfit, tp));
        }
    }

    if let Some(sl) = position.stop_loss {
        if TriggerCondition::adverse(position.side).is_met(price, sl) {
            return Some((CloseReason::StopLoss, sl));
        }
    }

    None
}

/// TP must sit on the profitable side of `reference`, SL on the losing side.
pub fn check_tp_sl_placement(
    side: Side,
    reference: Price,
    take_profit: Option<Price>,
    stop_loss: Option<Price>,
) -> Result<(), String> {
    if let Some(tp) = take_profit {
        let ok = match side {
            Side::Long => tp > reference,
            Side::Short => tp < reference,
        };
        if !ok {
            return Err(format!("take profit {tp} is on the wrong side of entry {reference} for a {side}"));
        }
    }

    if let Some(sl) = stop_loss {
        let ok = match side {
            Side::Long => sl < reference,
            Side::Short => sl > reference,
        };
        if !ok {
            return Err(format!("stop loss {sl} is on the wrong side of entry {reference} for a {side}"));
        }
    }

    Ok(())
}
