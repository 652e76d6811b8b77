//! Pricing math: liquidation price, unrealized PnL/ROE and fees.
//!
//! Everything here is pure. Inputs are raw decimals so callers holding
//! unvalidated values (storage rows, user input) get the documented zero
//! result instead of a panic. Arithmetic is checked; an overflow or a failed
//! division collapses to zero rather than leaking a garbage number.

use crate::types::Side;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Which fee schedule an execution pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeTier {
    /// Market orders and closes, executed immediately.
    Taker,
    /// Resting limit orders.
    Maker,
}

/// Unrealized profit and return on margin (percent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pnl {
    pub pnl: Decimal,
    pub roe: Decimal,
}

impl Pnl {
    pub fn zero() -> Self {
        Self::default()
    }
}

/// LONG: entry * (1 - 1/leverage). SHORT: entry * (1 + 1/leverage).
/// Zero when entry or leverage is not positive.
pub fn liquidation_price(side: Side, entry_price: Decimal, leverage: Decimal) -> Decimal {
    if entry_price <= Decimal::ZERO || leverage <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let Some(fraction) = Decimal::ONE.checked_div(leverage) else {
        return Decimal::ZERO;
    };

    let factor = match side {
        Side::Long => Decimal::ONE.checked_sub(fraction),
        Side::Short => Decimal::ONE.checked_add(fraction),
    };

    factor
        .and_then(|f| entry_price.checked_mul(f))
        .unwrap_or(Decimal::ZERO)
}

/// PnL = price move as a fraction of entry, times leverage, times margin.
/// ROE = pnl / margin * 100.
pub fn unrealized_pnl(
    side: Side,
    entry_price: Decimal,
    leverage: Decimal,
    margin: Decimal,
    current_price: Decimal,
) -> Pnl {
    let inputs = [entry_price, leverage, margin, current_price];
    if inputs.iter().any(|v| *v <= Decimal::ZERO) {
        return Pnl::zero();
    }

    let delta = match side {
        Side::Long => current_price.checked_sub(entry_price),
        Side::Short => entry_price.checked_sub(current_price),
    };

    let pnl = delta
        .and_then(|d| d.checked_div(entry_price))
        .and_then(|r| r.checked_mul(leverage))
        .and_then(|r| r.checked_mul(margin));

    let Some(pnl) = pnl else {
        return Pnl::zero();
    };

    let roe = pnl
        .checked_div(margin)
        .and_then(|r| r.checked_mul(dec!(100)))
        .unwrap_or(Decimal::ZERO);

    Pnl { pnl, roe }
}

/// Fee on notional: margin * leverage * rate.
pub fn fee(margin: Decimal, leverage: Decimal, fee_rate: Decimal) -> Decimal {
    if margin <= Decimal::ZERO || leverage <= Decimal::ZERO || fee_rate < Decimal::ZERO {
        return Decimal::ZERO;
    }

    margin
        .checked_mul(leverage)
        .and_then(|n| n.checked_mul(fee_rate))
        .unwrap_or(Decimal::ZERO)
}

/// Notional exposure of a leg: margin * leverage.
pub fn notional(margin: Decimal, leverage: Decimal) -> Decimal {
    margin.checked_mul(leverage).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liquidation_long_and_short() {
        assert_eq!(liquidation_price(Side::Long, dec!(50000), dec!(10)), dec!(45000));
        assert_eq!(liquidation_price(Side::Short, dec!(50000), dec!(10)), dec!(55000));
    }

    #[test]
    fn liquidation_one_x_long_is_zero() {
        // 1x long can never be wiped out
        assert_eq!(liquidation_price(Side::Long, dec!(100), dec!(1)), Decimal::ZERO);
        assert_eq!(liquidation_price(Side::Short, dec!(100), dec!(1)), dec!(200));
    }

    #[test]
    fn liquidation_guards_bad_inputs() {
        assert_eq!(liquidation_price(Side::Long, dec!(0), dec!(10)), Decimal::ZERO);
        assert_eq!(liquidation_price(Side::Short, dec!(-5), dec!(10)), Decimal::ZERO);
        assert_eq!(liquidation_price(Side::Long, dec!(100), dec!(0)), Decimal::ZERO);
    }

    #[test]
    fn pnl_long_profit() {
        let p = unrealized_pnl(Side::Long, dec!(50000), dec!(10), dec!(100), dec!(55000));
        // +10% move * 10x * 100 margin
        assert_eq!(p.pnl, dec!(100));
        assert_eq!(p.roe, dec!(100));
    }

    #[test]
    fn pnl_short_loss_mirrors_long() {
        let long = unrealized_pnl(Side::Long, dec!(200), dec!(5), dec!(40), dec!(220));
        let short = unrealized_pnl(Side::Short, dec!(200), dec!(5), dec!(40), dec!(220));
        assert_eq!(long.pnl, dec!(20));
        assert_eq!(short.pnl, dec!(-20));
        assert_eq!(short.roe, dec!(-50));
    }

    #[test]
    fn pnl_at_liquidation_is_minus_margin() {
        let liq = liquidation_price(Side::Long, dec!(50000), dec!(10));
        let p = unrealized_pnl(Side::Long, dec!(50000), dec!(10), dec!(100), liq);
        assert_eq!(p.pnl, dec!(-100));
        assert_eq!(p.roe, dec!(-100));
    }

    #[test]
    fn pnl_guards_non_positive_inputs() {
        assert_eq!(unrealized_pnl(Side::Long, dec!(0), dec!(10), dec!(100), dec!(1)), Pnl::zero());
        assert_eq!(unrealized_pnl(Side::Long, dec!(1), dec!(10), dec!(0), dec!(1)), Pnl::zero());
        assert_eq!(unrealized_pnl(Side::Short, dec!(1), dec!(10), dec!(5), dec!(-1)), Pnl::zero());
    }

    #[test]
    fn pnl_overflow_collapses_to_zero() {
        let huge = Decimal::MAX;
        let p = unrealized_pnl(Side::Long, dec!(0.0000001), huge, huge, huge);
        assert_eq!(p, Pnl::zero());
    }

    #[test]
    fn taker_fee_on_notional() {
        // 100 margin * 10x * 0.04%
        assert_eq!(fee(dec!(100), dec!(10), dec!(0.0004)), dec!(0.4));
        assert_eq!(fee(dec!(0), dec!(10), dec!(0.0004)), Decimal::ZERO);
    }
}
