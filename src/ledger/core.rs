// 8.0 ledger/core.rs: ledger struct, request validation, compensation helpers.

use super::locks::UserLocks;
use super::results::{LedgerError, PositionRequest, ValidRequest};
use crate::account::AccountBalance;
use crate::conditional::check_tp_sl_placement;
use crate::config::{FeeConfig, LimitConfig};
use crate::events::{Notification, NotificationKind, NotificationSink, NotificationTarget};
use crate::storage::Storage;
use crate::types::{Leverage, Price, Quote, UserId};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, warn};

/** 8.1: the ledger. storage is shared with the balance layer */
pub struct PositionLedger {
    pub(super) fees: FeeConfig,
    pub(super) limits: LimitConfig,
    pub(super) storage: Arc<dyn Storage>,
    pub(super) balances: AccountBalance,
    pub(super) sink: Arc<dyn NotificationSink>,
    pub(super) locks: UserLocks,
}

impl PositionLedger {
    pub fn new(
        fees: FeeConfig,
        limits: LimitConfig,
        storage: Arc<dyn Storage>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            fees,
            limits,
            balances: AccountBalance::new(storage.clone()),
            storage,
            sink,
            locks: UserLocks::new(),
        }
    }

    pub fn balances(&self) -> &AccountBalance {
        &self.balances
    }

    pub fn fees(&self) -> &FeeConfig {
        &self.fees
    }

    /// Credit virtual funds under the user's lock.
    pub async fn deposit(&self, user_id: UserId, amount: Quote) -> Result<Quote, LedgerError> {
        let _guard = self.locks.lock(user_id).await;
        Ok(self.balances.fund(user_id, amount).await?)
    }

    // 8.1.1: validation happens before any lock or write
    pub(super) fn validate(&self, request: &PositionRequest) -> Result<ValidRequest, LedgerError> {
        let leverage = Leverage::new(request.leverage)
            .ok_or_else(|| LedgerError::Validation("leverage must be at least 1x".to_string()))?;
        if leverage.get() > self.limits.max_leverage {
            return Err(LedgerError::Validation(format!(
                "leverage {leverage} is above the {}x limit",
                self.limits.max_leverage
            )));
        }

        if request.margin <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "margin must be positive, got {}",
                request.margin
            )));
        }

        let price = positive_price("price", request.price)?;
        // merge weighs each leg by margin * leverage * price, keep that in range
        request
            .margin
            .checked_mul(leverage.value())
            .and_then(|n| n.checked_mul(price.value()))
            .ok_or_else(|| LedgerError::Validation("position size is out of range".to_string()))?;
        let take_profit = request
            .take_profit
            .map(|p| positive_price("take profit", p))
            .transpose()?;
        let stop_loss = request
            .stop_loss
            .map(|p| positive_price("stop loss", p))
            .transpose()?;
        check_tp_sl_placement(request.side, price, take_profit, stop_loss).map_err(LedgerError::Validation)?;

        Ok(ValidRequest {
            user_id: request.user_id,
            symbol: request.symbol.clone(),
            side: request.side,
            leverage,
            margin: Quote::new(request.margin),
            price,
            take_profit,
            stop_loss,
        })
    }

    pub(super) fn emit(
        &self,
        kind: NotificationKind,
        user_id: UserId,
        target: NotificationTarget,
        detail: String,
    ) {
        self.sink.notify(Notification::new(kind, user_id, target, detail));
    }

    // 8.1.2: undo a balance debit after the paired ledger write failed
    pub(super) async fn restore_balance(
        &self,
        operation: &'static str,
        user_id: UserId,
        prior: Quote,
        cause: LedgerError,
    ) -> LedgerError {
        match self.balances.restore(user_id, prior).await {
            Ok(()) => {
                warn!(%user_id, operation, error = %cause, "rolled back balance");
                cause
            }
            Err(e) => {
                error!(
                    %user_id,
                    operation,
                    balance = %prior,
                    error = %cause,
                    rollback_error = %e,
                    "balance rollback failed, ledger and balance disagree"
                );
                LedgerError::CompensationFailed {
                    operation,
                    cause: cause.to_string(),
                }
            }
        }
    }
}

/// Margin plus fee, the amount an entry takes out of the balance.
pub(super) fn entry_cost(margin: Quote, fee: Quote) -> Result<Quote, LedgerError> {
    margin
        .checked_add(fee)
        .ok_or_else(|| LedgerError::Validation(format!("margin {margin} plus fee {fee} is out of range")))
}

pub(super) fn positive_price(field: &str, value: Decimal) -> Result<Price, LedgerError> {
    Price::new(value).ok_or_else(|| LedgerError::Validation(format!("{field} must be positive, got {value}")))
}
