//! Opening, merging and closing positions.

use super::core::{entry_cost, positive_price, PositionLedger};
use super::results::{CloseOutcome, LedgerError, OpenOutcome, PositionRequest, ValidRequest};
use crate::conditional::check_tp_sl_placement;
use crate::events::{CloseReason, NotificationKind, NotificationTarget};
use crate::position::{merge_legs, settle_close, NewPosition, Position, PositionPatch};
use crate::pricing::{self, FeeTier};
use crate::types::{PositionId, Price, Quote, Timestamp};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

impl PositionLedger {
    /// Open a position, or fold the fill into the user's open position in
    /// the same direction. Touches the ledger only, never the balance.
    pub async fn open_or_merge_position(&self, request: &PositionRequest) -> Result<OpenOutcome, LedgerError> {
        let request = self.validate(request)?;
        let _guard = self.locks.lock(request.user_id).await;
        self.open_or_merge_locked(&request, Quote::zero()).await
    }

    /// Market entry: charge margin plus taker fee, then open or merge at
    /// `request.price`. The balance is put back if the ledger write fails.
    pub async fn open_market_position(&self, request: &PositionRequest) -> Result<OpenOutcome, LedgerError> {
        let request = self.validate(request)?;
        let fee = Quote::new(pricing::fee(
            request.margin.value(),
            request.leverage.value(),
            self.fees.rate(FeeTier::Taker),
        ));
        let required = entry_cost(request.margin, fee)?;

        let _guard = self.locks.lock(request.user_id).await;
        let prior = self.balances.reserve(request.user_id, required).await?;

        match self.open_or_merge_locked(&request, fee).await {
            Ok(outcome) => Ok(outcome),
            Err(cause) => Err(self
                .restore_balance("open market position", request.user_id, prior, cause)
                .await),
        }
    }

    // 8.2: caller holds the user lock. notifies only after the write landed
    pub(super) async fn open_or_merge_locked(
        &self,
        request: &ValidRequest,
        fee: Quote,
    ) -> Result<OpenOutcome, LedgerError> {
        let existing = self
            .storage
            .get_open_position(request.user_id, &request.symbol, request.side)
            .await?;

        let Some(current) = existing else {
            let new = NewPosition::new(
                request.user_id,
                request.symbol.clone(),
                request.side,
                request.leverage,
                request.margin,
                request.price,
                request.take_profit,
                request.stop_loss,
                Timestamp::now(),
            );
            let position = self.storage.insert_position(new).await?;

            info!(
                user_id = %position.user_id,
                position_id = %position.id,
                symbol = %position.symbol,
                side = %position.side,
                margin = %position.margin,
                entry = %position.entry_price,
                "position opened"
            );
            self.emit(
                NotificationKind::Opened,
                position.user_id,
                NotificationTarget::Position(position.id),
                format!(
                    "{} {} {} opened at {} with {} margin",
                    position.symbol, position.side, position.leverage, position.entry_price, position.margin
                ),
            );

            return Ok(OpenOutcome {
                position,
                merged: false,
                had_tp_sl: false,
                adopted_tp_sl: false,
                fee,
            });
        };

        let legs = merge_legs(&current, request.leverage, request.margin, request.price).ok_or_else(|| {
            LedgerError::Validation(format!(
                "adding {} margin at {} would put {} out of range",
                request.margin, request.price, current.id
            ))
        })?;

        // the fill's own TP/SL only lands in slots the position leaves empty,
        // and only while it still sits on the right side of the new entry
        let side = current.side;
        let entry = legs.entry_price;
        let take_profit = current
            .take_profit
            .is_none()
            .then_some(request.take_profit)
            .flatten()
            .filter(|tp| check_tp_sl_placement(side, entry, Some(*tp), None).is_ok());
        let stop_loss = current
            .stop_loss
            .is_none()
            .then_some(request.stop_loss)
            .flatten()
            .filter(|sl| check_tp_sl_placement(side, entry, None, Some(*sl)).is_ok());

        let mut patch = legs.as_patch();
        if take_profit.is_some() {
            patch.take_profit = Some(take_profit);
        }
        if stop_loss.is_some() {
            patch.stop_loss = Some(stop_loss);
        }
        let adopted_tp_sl = take_profit.is_some() || stop_loss.is_some();

        let position = self.storage.update_position(current.id, patch).await?;
        let had_tp_sl = current.has_tp_sl();

        info!(
            user_id = %position.user_id,
            position_id = %position.id,
            added_margin = %request.margin,
            entry = %position.entry_price,
            leverage = %position.leverage,
            adopted_tp_sl,
            "position merged"
        );

        let mut detail = format!(
            "{} {} increased to {} margin, average entry {}",
            position.symbol, position.side, position.margin, position.entry_price
        );
        if had_tp_sl {
            detail.push_str(". Existing TP/SL was kept, check it against the new entry");
        }
        if adopted_tp_sl {
            detail.push_str(&format!(
                ". TP {} / SL {} now set",
                level(position.take_profit),
                level(position.stop_loss)
            ));
        }
        let dropped = (current.take_profit.is_none() && request.take_profit.is_some() && take_profit.is_none())
            || (current.stop_loss.is_none() && request.stop_loss.is_some() && stop_loss.is_none());
        if dropped {
            detail.push_str(". A TP/SL from this fill was on the wrong side of the new entry and was not set");
        }
        self.emit(
            NotificationKind::Merged,
            position.user_id,
            NotificationTarget::Position(position.id),
            detail,
        );

        Ok(OpenOutcome {
            position,
            merged: true,
            had_tp_sl,
            adopted_tp_sl,
            fee,
        })
    }

    /// Close an OPEN position at `close_price` on the user's request.
    pub async fn close_position(&self, position_id: PositionId, close_price: Decimal) -> Result<CloseOutcome, LedgerError> {
        let close_price = positive_price("close price", close_price)?;
        self.close_position_with_reason(position_id, close_price, CloseReason::UserClosed)
            .await
    }

    /// Close at `close_price` and notify with the kind matching `reason`.
    /// Fails with `PositionNotFound` when the position is gone or already
    /// closed, which is how a second close of the same position ends.
    pub async fn close_position_with_reason(
        &self,
        position_id: PositionId,
        close_price: Price,
        reason: CloseReason,
    ) -> Result<CloseOutcome, LedgerError> {
        let user_id = self.load_open(position_id).await?.user_id;
        let _guard = self.locks.lock(user_id).await;
        // re-read under the lock, a tick may have closed it meanwhile
        let position = self.load_open(position_id).await?;

        let settlement = settle_close(&position, close_price, self.fees.rate(FeeTier::Taker));
        let closed = self
            .storage
            .update_position(
                position_id,
                PositionPatch::close(close_price, settlement.pnl, Timestamp::now()),
            )
            .await?;

        if let Err(e) = self.balances.credit(user_id, settlement.returned).await {
            let cause = LedgerError::from(e);
            return Err(match self.storage.update_position(position_id, PositionPatch::reopen()).await {
                Ok(_) => {
                    warn!(%user_id, %position_id, error = %cause, "close rolled back, position reopened");
                    cause
                }
                Err(rollback) => {
                    error!(
                        %user_id,
                        %position_id,
                        returned = %settlement.returned,
                        error = %cause,
                        rollback_error = %rollback,
                        "position closed but payout not credited"
                    );
                    LedgerError::CompensationFailed {
                        operation: "close position",
                        cause: cause.to_string(),
                    }
                }
            });
        }

        info!(
            %user_id,
            %position_id,
            ?reason,
            price = %close_price,
            pnl = %settlement.pnl,
            returned = %settlement.returned,
            "position closed"
        );
        self.emit(
            reason.notification_kind(),
            user_id,
            NotificationTarget::Position(position_id),
            close_detail(&closed, reason, close_price, settlement.pnl, settlement.fee, settlement.returned),
        );

        Ok(CloseOutcome {
            position: closed,
            reason,
            pnl: settlement.pnl,
            fee: settlement.fee,
            returned: settlement.returned,
        })
    }

    /// Replace TP/SL on an OPEN position. `None` clears the level.
    pub async fn update_tp_sl(
        &self,
        position_id: PositionId,
        take_profit: Option<Decimal>,
        stop_loss: Option<Decimal>,
    ) -> Result<Position, LedgerError> {
        let take_profit = take_profit.map(|p| positive_price("take profit", p)).transpose()?;
        let stop_loss = stop_loss.map(|p| positive_price("stop loss", p)).transpose()?;

        let user_id = self.load_open(position_id).await?.user_id;
        let _guard = self.locks.lock(user_id).await;
        let position = self.load_open(position_id).await?;

        check_tp_sl_placement(position.side, position.entry_price, take_profit, stop_loss)
            .map_err(LedgerError::Validation)?;

        let patch = PositionPatch {
            take_profit: Some(take_profit),
            stop_loss: Some(stop_loss),
            ..Default::default()
        };
        let updated = self.storage.update_position(position_id, patch).await?;
        info!(%user_id, %position_id, tp = ?take_profit, sl = ?stop_loss, "tp/sl updated");
        Ok(updated)
    }

    async fn load_open(&self, position_id: PositionId) -> Result<Position, LedgerError> {
        self.storage
            .get_position(position_id)
            .await?
            .filter(Position::is_open)
            .ok_or(LedgerError::PositionNotFound(position_id))
    }
}

fn level(price: Option<Price>) -> String {
    price.map_or_else(|| "-".to_string(), |p| p.to_string())
}

fn close_detail(
    position: &Position,
    reason: CloseReason,
    price: Price,
    pnl: Quote,
    fee: Quote,
    returned: Quote,
) -> String {
    let what = match reason {
        CloseReason::UserClosed => "closed",
        CloseReason::Liquidation => "liquidated",
        CloseReason::TakeProfit => "take profit hit",
        CloseReason::StopLoss => "stop loss hit",
    };
    format!(
        "{} {} {what} at {price}: pnl {pnl}, fee {fee}, returned {returned}",
        position.symbol, position.side
    )
}
