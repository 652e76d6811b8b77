//! Limit order lifecycle: submit, cancel, fill.

use super::core::{entry_cost, PositionLedger};
use super::results::{LedgerError, OpenOutcome, PositionRequest, ValidRequest};
use crate::events::{NotificationKind, NotificationTarget};
use crate::order::{NewOrder, OrderPatch, OrderStatus, PendingOrder};
use crate::pricing::{self, FeeTier};
use crate::types::{OrderId, Price, Quote, Timestamp};
use tracing::{error, info, warn};

impl PositionLedger {
    /// Rest a limit order. Margin plus maker fee leave the balance now and
    /// come back in full on cancel.
    pub async fn submit_limit_order(&self, request: &PositionRequest) -> Result<PendingOrder, LedgerError> {
        let request = self.validate(request)?;
        let fee = Quote::new(pricing::fee(
            request.margin.value(),
            request.leverage.value(),
            self.fees.rate(FeeTier::Maker),
        ));
        let required = entry_cost(request.margin, fee)?;

        let _guard = self.locks.lock(request.user_id).await;
        let prior = self.balances.reserve(request.user_id, required).await?;

        let new = NewOrder {
            user_id: request.user_id,
            symbol: request.symbol.clone(),
            side: request.side,
            leverage: request.leverage,
            margin: request.margin,
            limit_price: request.price,
            take_profit: request.take_profit,
            stop_loss: request.stop_loss,
            fee,
            created_at: Timestamp::now(),
        };
        let order = match self.storage.insert_order(new).await {
            Ok(order) => order,
            Err(e) => {
                return Err(self
                    .restore_balance("submit limit order", request.user_id, prior, e.into())
                    .await)
            }
        };

        info!(
            user_id = %order.user_id,
            order_id = %order.id,
            symbol = %order.symbol,
            side = %order.side,
            limit = %order.limit_price,
            reserved = %required,
            "limit order placed"
        );
        Ok(order)
    }

    /// Cancel a PENDING order and refund margin plus fee. A second cancel
    /// finds nothing pending and fails with `OrderNotFound`.
    pub async fn cancel_limit_order(&self, order_id: OrderId) -> Result<PendingOrder, LedgerError> {
        let user_id = self.load_pending(order_id).await?.user_id;
        let _guard = self.locks.lock(user_id).await;
        let order = self.load_pending(order_id).await?;

        self.storage
            .update_order(order_id, OrderPatch::status(OrderStatus::Cancelled))
            .await?;

        if let Err(e) = self.balances.credit(user_id, order.reserved()).await {
            return Err(self.revert_to_pending("cancel limit order", order_id, e.into()).await);
        }

        info!(%user_id, %order_id, refunded = %order.reserved(), "limit order cancelled");
        self.emit(
            NotificationKind::LimitCancelled,
            user_id,
            NotificationTarget::Order(order_id),
            format!(
                "{} {} limit at {} cancelled, {} refunded",
                order.symbol,
                order.side,
                order.limit_price,
                order.reserved()
            ),
        );

        Ok(PendingOrder {
            status: OrderStatus::Cancelled,
            ..order
        })
    }

    /// Fill a PENDING order. The position opens (or merges) at the order's
    /// limit price; `fill_price` is the tick that triggered it.
    pub async fn fill_limit_order(&self, order_id: OrderId, fill_price: Price) -> Result<OpenOutcome, LedgerError> {
        let user_id = self.load_pending(order_id).await?.user_id;
        let _guard = self.locks.lock(user_id).await;
        let order = self.load_pending(order_id).await?;

        self.storage
            .update_order(order_id, OrderPatch::status(OrderStatus::Filled))
            .await?;

        let request = ValidRequest {
            user_id,
            symbol: order.symbol.clone(),
            side: order.side,
            leverage: order.leverage,
            margin: order.margin,
            price: order.limit_price,
            take_profit: order.take_profit,
            stop_loss: order.stop_loss,
        };
        let outcome = match self.open_or_merge_locked(&request, order.fee).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.revert_to_pending("fill limit order", order_id, e).await),
        };

        info!(
            %user_id,
            %order_id,
            position_id = %outcome.position.id,
            limit = %order.limit_price,
            market = %fill_price,
            "limit order filled"
        );
        self.emit(
            NotificationKind::LimitFilled,
            user_id,
            NotificationTarget::Order(order_id),
            format!(
                "{} {} limit filled at {} (market {})",
                order.symbol, order.side, order.limit_price, fill_price
            ),
        );

        Ok(outcome)
    }

    async fn load_pending(&self, order_id: OrderId) -> Result<PendingOrder, LedgerError> {
        self.storage
            .get_order(order_id)
            .await?
            .filter(PendingOrder::is_pending)
            .ok_or(LedgerError::OrderNotFound(order_id))
    }

    // 8.3: undo a terminal status write after the follow-up step failed
    async fn revert_to_pending(&self, operation: &'static str, order_id: OrderId, cause: LedgerError) -> LedgerError {
        match self
            .storage
            .update_order(order_id, OrderPatch::status(OrderStatus::Pending))
            .await
        {
            Ok(()) => {
                warn!(%order_id, operation, error = %cause, "order returned to pending");
                cause
            }
            Err(e) => {
                error!(
                    %order_id,
                    operation,
                    error = %cause,
                    rollback_error = %e,
                    "order status rollback failed, order and balance disagree"
                );
                LedgerError::CompensationFailed {
                    operation,
                    cause: cause.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeeConfig, LimitConfig};
    use crate::events::NotificationCollector;
    use crate::storage::{InMemoryStorage, StorageOp};
    use crate::types::{Side, UserId};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn setup(balance: Decimal) -> (PositionLedger, Arc<InMemoryStorage>, Arc<NotificationCollector>) {
        let storage = Arc::new(InMemoryStorage::new());
        let notes = Arc::new(NotificationCollector::new());
        let ledger = PositionLedger::new(
            FeeConfig::default(),
            LimitConfig::default(),
            storage.clone(),
            notes.clone(),
        );
        ledger.deposit(UserId(1), Quote::new(balance)).await.unwrap();
        (ledger, storage, notes)
    }

    fn buy_limit(limit: Decimal) -> PositionRequest {
        PositionRequest::new(UserId(1), "btcusdt", Side::Long, 10, dec!(100), limit)
    }

    async fn balance(ledger: &PositionLedger) -> Decimal {
        ledger.balances().balance(UserId(1)).await.unwrap().value()
    }

    #[tokio::test]
    async fn test_submit_reserves_margin_and_maker_fee() {
        let (ledger, _, _) = setup(dec!(1000)).await;
        let order = ledger.submit_limit_order(&buy_limit(dec!(48000))).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.fee.value(), dec!(0.2));
        assert_eq!(balance(&ledger).await, dec!(899.8));
    }

    #[tokio::test]
    async fn test_submit_insufficient_balance() {
        let (ledger, _, _) = setup(dec!(100.1)).await;
        let err = ledger.submit_limit_order(&buy_limit(dec!(48000))).await;
        assert!(matches!(err, Err(LedgerError::InsufficientBalance { .. })));
        assert_eq!(balance(&ledger).await, dec!(100.1));
        assert!(ledger.pending_orders(UserId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_refunds_when_insert_fails() {
        let (ledger, storage, _) = setup(dec!(1000)).await;
        storage.fail_next(StorageOp::InsertOrder);
        let err = ledger.submit_limit_order(&buy_limit(dec!(48000))).await;
        assert!(matches!(err, Err(LedgerError::Persistence(_))));
        assert_eq!(balance(&ledger).await, dec!(1000));
    }

    #[tokio::test]
    async fn test_cancel_refunds_exactly_once() {
        let (ledger, _, notes) = setup(dec!(1000)).await;
        let order = ledger.submit_limit_order(&buy_limit(dec!(48000))).await.unwrap();

        let cancelled = ledger.cancel_limit_order(order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(balance(&ledger).await, dec!(1000));

        let again = ledger.cancel_limit_order(order.id).await;
        assert!(matches!(again, Err(LedgerError::OrderNotFound(_))));
        assert_eq!(balance(&ledger).await, dec!(1000));
        assert_eq!(notes.kinds(), vec![NotificationKind::LimitCancelled]);
    }

    #[tokio::test]
    async fn test_cancel_stays_pending_when_refund_fails() {
        let (ledger, storage, _) = setup(dec!(1000)).await;
        let order = ledger.submit_limit_order(&buy_limit(dec!(48000))).await.unwrap();
        storage.fail_next(StorageOp::SetBalance);

        assert!(ledger.cancel_limit_order(order.id).await.is_err());
        assert_eq!(ledger.pending_orders(UserId(1)).await.unwrap().len(), 1);
        assert_eq!(balance(&ledger).await, dec!(899.8));

        ledger.cancel_limit_order(order.id).await.unwrap();
        assert_eq!(balance(&ledger).await, dec!(1000));
    }

    #[tokio::test]
    async fn test_fill_opens_at_limit_price() {
        let (ledger, _, notes) = setup(dec!(1000)).await;
        let order = ledger.submit_limit_order(&buy_limit(dec!(48000))).await.unwrap();

        let outcome = ledger
            .fill_limit_order(order.id, Price::new_unchecked(dec!(47900)))
            .await
            .unwrap();
        assert_eq!(outcome.position.entry_price.value(), dec!(48000));
        assert_eq!(outcome.fee.value(), dec!(0.2));
        // the reservation became the margin, nothing else moves
        assert_eq!(balance(&ledger).await, dec!(899.8));
        assert_eq!(notes.kinds(), vec![NotificationKind::Opened, NotificationKind::LimitFilled]);
        assert!(notes.notifications()[1].detail.contains("47900"));

        let cancel_after_fill = ledger.cancel_limit_order(order.id).await;
        assert!(matches!(cancel_after_fill, Err(LedgerError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn test_fill_into_bare_position_carries_order_tp_sl() {
        let (ledger, _, _) = setup(dec!(1000)).await;
        ledger.open_market_position(&buy_limit(dec!(50000))).await.unwrap();
        let order = ledger
            .submit_limit_order(
                &buy_limit(dec!(48000))
                    .with_take_profit(dec!(52000))
                    .with_stop_loss(dec!(47000)),
            )
            .await
            .unwrap();

        let outcome = ledger
            .fill_limit_order(order.id, Price::new_unchecked(dec!(47990)))
            .await
            .unwrap();
        assert!(outcome.merged);
        assert!(outcome.adopted_tp_sl);
        assert_eq!(outcome.position.entry_price.value(), dec!(49000));
        assert_eq!(outcome.position.take_profit.map(|p| p.value()), Some(dec!(52000)));
        assert_eq!(outcome.position.stop_loss.map(|p| p.value()), Some(dec!(47000)));

        let open = ledger.open_positions(UserId(1)).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].take_profit, outcome.position.take_profit);
        assert_eq!(open[0].stop_loss, outcome.position.stop_loss);
    }

    #[tokio::test]
    async fn test_fill_reverts_when_open_fails() {
        let (ledger, storage, notes) = setup(dec!(1000)).await;
        let order = ledger.submit_limit_order(&buy_limit(dec!(48000))).await.unwrap();
        storage.fail_next(StorageOp::InsertPosition);

        let err = ledger.fill_limit_order(order.id, Price::new_unchecked(dec!(47000))).await;
        assert!(matches!(err, Err(LedgerError::Persistence(_))));
        assert_eq!(ledger.pending_orders(UserId(1)).await.unwrap().len(), 1);
        assert!(ledger.open_positions(UserId(1)).await.unwrap().is_empty());
        assert!(notes.notifications().is_empty());
    }
}
