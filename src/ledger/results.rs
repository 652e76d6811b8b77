// 8.0.2: request, result and error types for ledger operations.

use crate::account::AccountError;
use crate::events::CloseReason;
use crate::position::Position;
use crate::storage::StorageError;
use crate::types::{Leverage, OrderId, PositionId, Price, Quote, Side, Symbol, UserId};
use rust_decimal::Decimal;

/// Raw order entry as it arrives from the app layer. validated by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRequest {
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub leverage: u32,
    pub margin: Decimal,
    /// Entry price for market opens, limit price for limit orders.
    pub price: Decimal,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
}

impl PositionRequest {
    pub fn new(
        user_id: UserId,
        symbol: impl Into<Symbol>,
        side: Side,
        leverage: u32,
        margin: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            user_id,
            symbol: symbol.into(),
            side,
            leverage,
            margin,
            price,
            take_profit: None,
            stop_loss: None,
        }
    }

    pub fn with_take_profit(mut self, price: Decimal) -> Self {
        self.take_profit = Some(price);
        self
    }

    pub fn with_stop_loss(mut self, price: Decimal) -> Self {
        self.stop_loss = Some(price);
        self
    }
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct ValidRequest {
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub leverage: Leverage,
    pub margin: Quote,
    pub price: Price,
    pub take_profit: Option<Price>,
    pub stop_loss: Option<Price>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenOutcome {
    pub position: Position,
    /// The fill went into an existing same-direction position.
    pub merged: bool,
    /// The merged-into position already had TP/SL, which was kept as is.
    pub had_tp_sl: bool,
    /// The fill's own TP/SL was copied into empty slots of the merged-into position.
    pub adopted_tp_sl: bool,
    /// Fee charged for this entry (zero for a bare open-or-merge).
    pub fee: Quote,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseOutcome {
    pub position: Position,
    pub reason: CloseReason,
    pub pnl: Quote,
    pub fee: Quote,
    /// Credited back to the balance: max(margin + pnl - fee, 0).
    pub returned: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    pub user_id: UserId,
    pub balance: Quote,
    pub locked_margin: Quote,
    pub reserved_for_orders: Quote,
    pub unrealized_pnl: Quote,
    /// balance + locked margin + reservations + unrealized pnl
    pub equity: Quote,
    pub open_positions: usize,
    pub pending_orders: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Quote, available: Quote },

    #[error("Position {0} not found or already closed")]
    PositionNotFound(PositionId),

    #[error("Order {0} not found or no longer pending")]
    OrderNotFound(OrderId),

    #[error("Could not save the change, nothing was applied: {0}")]
    Persistence(#[from] StorageError),

    #[error("{operation} failed and could not be rolled back: {cause}")]
    CompensationFailed { operation: &'static str, cause: String },
}

impl From<AccountError> for LedgerError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InsufficientBalance { requested, available } => {
                LedgerError::InsufficientBalance {
                    required: requested,
                    available,
                }
            }
            AccountError::NonPositiveAmount(amount) => {
                LedgerError::Validation(format!("amount must be positive, got {amount}"))
            }
            AccountError::Overflow { balance, amount } => {
                LedgerError::Validation(format!("amount {amount} overflows balance {balance}"))
            }
            AccountError::Storage(e) => LedgerError::Persistence(e),
        }
    }
}

impl LedgerError {
    /// Expected races (row already settled by someone else) rather than faults.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::PositionNotFound(_) | LedgerError::OrderNotFound(_))
    }
}
