//! Solvency invariant tests.
//!
//! Every unit of virtual USDT is either in the balance, locked as position
//! margin, reserved by a resting order, or gone as a fee or realized loss.
//! These tests verify nothing is created or lost along the way, including
//! when storage fails halfway through an operation.

use paper_perps::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

const USER: UserId = UserId(1);

fn ledger_with(storage: Arc<InMemoryStorage>) -> Arc<PositionLedger> {
    Arc::new(PositionLedger::new(
        FeeConfig::default(),
        LimitConfig::default(),
        storage,
        Arc::new(NullSink),
    ))
}

async fn funded(amount: Decimal) -> (Arc<PositionLedger>, Arc<InMemoryStorage>) {
    let storage = Arc::new(InMemoryStorage::new());
    let ledger = ledger_with(storage.clone());
    ledger.deposit(USER, Quote::new(amount)).await.unwrap();
    (ledger, storage)
}

/// balance + locked margin + reserved order funds
async fn holdings(ledger: &PositionLedger, user: UserId) -> Decimal {
    let summary = ledger.account_summary(user, &HashMap::new()).await.unwrap();
    summary.balance.add(summary.locked_margin).add(summary.reserved_for_orders).value()
}

#[derive(Debug, Clone)]
enum Op {
    Market { long: bool, margin: i64, leverage: u32 },
    Limit { long: bool, margin: i64, leverage: u32 },
    Cancel,
    Fill,
    Close { move_pct: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<bool>(), 1i64..200, 1u32..=20).prop_map(|(long, margin, leverage)| Op::Market { long, margin, leverage }),
        (any::<bool>(), 1i64..200, 1u32..=20).prop_map(|(long, margin, leverage)| Op::Limit { long, margin, leverage }),
        Just(Op::Cancel),
        Just(Op::Fill),
        (-30i64..=30).prop_map(|move_pct| Op::Close { move_pct }),
    ]
}

fn side(long: bool) -> Side {
    if long {
        Side::Long
    } else {
        Side::Short
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// holdings == deposit - fees paid on entry + net result of closes
    #[test]
    fn funds_are_conserved(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let result: Result<(), TestCaseError> = rt.block_on(async {
            let deposit = dec!(5000);
            let (ledger, _) = funded(deposit).await;
            let mut entry_fees = Decimal::ZERO;
            let mut closed_net = Decimal::ZERO;

            for op in ops {
                match op {
                    Op::Market { long, margin, leverage } => {
                        let req = PositionRequest::new(USER, "btcusdt", side(long), leverage, Decimal::from(margin), dec!(100));
                        if let Ok(outcome) = ledger.open_market_position(&req).await {
                            entry_fees += outcome.fee.value();
                        }
                    }
                    Op::Limit { long, margin, leverage } => {
                        let limit = if long { dec!(95) } else { dec!(105) };
                        let req = PositionRequest::new(USER, "btcusdt", side(long), leverage, Decimal::from(margin), limit);
                        let _ = ledger.submit_limit_order(&req).await;
                    }
                    Op::Cancel => {
                        if let Some(order) = ledger.pending_orders(USER).await.unwrap().first() {
                            ledger.cancel_limit_order(order.id).await.unwrap();
                        }
                    }
                    Op::Fill => {
                        if let Some(order) = ledger.pending_orders(USER).await.unwrap().first() {
                            let outcome = ledger.fill_limit_order(order.id, order.limit_price).await.unwrap();
                            entry_fees += outcome.fee.value();
                        }
                    }
                    Op::Close { move_pct } => {
                        if let Some(position) = ledger.open_positions(USER).await.unwrap().first() {
                            let price = position.entry_price.value() * (dec!(100) + Decimal::from(move_pct)) / dec!(100);
                            let outcome = ledger.close_position(position.id, price).await.unwrap();
                            closed_net += outcome.returned.value() - position.margin.value();
                        }
                    }
                }

                let summary = ledger.account_summary(USER, &HashMap::new()).await.unwrap();
                prop_assert!(!summary.balance.is_negative());
                let held = holdings(&ledger, USER).await;
                let expected = deposit - entry_fees + closed_net;
                // averaged entries can carry 28 digits, sums may round in the last one
                prop_assert!((held - expected).abs() < dec!(0.000000001), "held {} expected {}", held, expected);
            }
            Ok(())
        });
        result?;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancels_refund_once() {
    let (ledger, _) = funded(dec!(1000)).await;
    let req = PositionRequest::new(USER, "btcusdt", Side::Long, 10, dec!(100), dec!(48000));
    let order = ledger.submit_limit_order(&req).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.cancel_limit_order(order.id).await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert!(matches!(e, LedgerError::OrderNotFound(_))),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(ledger.balances().balance(USER).await.unwrap().value(), dec!(1000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_closes_pay_once() {
    let (ledger, _) = funded(dec!(1000)).await;
    let req = PositionRequest::new(USER, "btcusdt", Side::Long, 10, dec!(100), dec!(100));
    let position = ledger.open_market_position(&req).await.unwrap().position;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.close_position(position.id, dec!(110)).await })
        })
        .collect();

    let mut payouts = Vec::new();
    for handle in handles {
        if let Ok(outcome) = handle.await.unwrap() {
            payouts.push(outcome.returned.value());
        }
    }

    assert_eq!(payouts, vec![dec!(199.6)]);
    // 1000 - 100.4 + 199.6
    assert_eq!(ledger.balances().balance(USER).await.unwrap().value(), dec!(1099.2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_never_overdraw() {
    let (ledger, _) = funded(dec!(1000)).await;

    // each costs 200.8, only four fit
    let handles: Vec<_> = (0..10)
        .map(|i| {
            let ledger = ledger.clone();
            let side = if i % 2 == 0 { Side::Long } else { Side::Short };
            tokio::spawn(async move {
                let req = PositionRequest::new(USER, "btcusdt", side, 10, dec!(200), dec!(100));
                ledger.open_market_position(&req).await
            })
        })
        .collect();

    let mut opened = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => opened += 1,
            Err(e) => assert!(matches!(e, LedgerError::InsufficientBalance { .. })),
        }
    }

    assert_eq!(opened, 4);
    assert_eq!(ledger.balances().balance(USER).await.unwrap().value(), dec!(196.8));
    assert_eq!(holdings(&ledger, USER).await, dec!(996.8));
}

#[tokio::test]
async fn failed_fill_keeps_reservation_with_the_order() {
    let (ledger, storage) = funded(dec!(1000)).await;
    let req = PositionRequest::new(USER, "btcusdt", Side::Short, 5, dec!(100), dec!(52000));
    let order = ledger.submit_limit_order(&req).await.unwrap();
    let before = holdings(&ledger, USER).await;

    storage.fail_next(StorageOp::InsertPosition);
    let err = ledger
        .fill_limit_order(order.id, Price::new_unchecked(dec!(52100)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Persistence(_)));
    assert_eq!(holdings(&ledger, USER).await, before);

    // the order is still there and still fills
    let outcome = ledger
        .fill_limit_order(order.id, Price::new_unchecked(dec!(52100)))
        .await
        .unwrap();
    assert_eq!(outcome.position.entry_price.value(), dec!(52000));
    assert_eq!(holdings(&ledger, USER).await, before - dec!(0.1));
}

#[tokio::test]
async fn failed_rollback_is_reported() {
    let (ledger, storage) = funded(dec!(1000)).await;
    let req = PositionRequest::new(USER, "btcusdt", Side::Long, 10, dec!(100), dec!(48000));
    let order = ledger.submit_limit_order(&req).await.unwrap();

    // refund fails, then putting the order back to PENDING fails too
    storage.fail_next(StorageOp::SetBalance);
    storage.fail_after(StorageOp::UpdateOrder, 1);

    let err = ledger.cancel_limit_order(order.id).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::CompensationFailed { operation: "cancel limit order", .. }
    ));
}

#[tokio::test]
async fn users_are_isolated() {
    let storage = Arc::new(InMemoryStorage::new());
    let ledger = ledger_with(storage);
    ledger.deposit(UserId(1), Quote::new(dec!(1000))).await.unwrap();
    ledger.deposit(UserId(2), Quote::new(dec!(1000))).await.unwrap();

    let alice = PositionRequest::new(UserId(1), "btcusdt", Side::Long, 10, dec!(100), dec!(100));
    let bob = PositionRequest::new(UserId(2), "btcusdt", Side::Long, 10, dec!(100), dec!(120));
    let a = ledger.open_market_position(&alice).await.unwrap();
    let b = ledger.open_market_position(&bob).await.unwrap();

    // same symbol and side, different users: no merge
    assert!(!b.merged);
    assert_ne!(a.position.id, b.position.id);
    assert_eq!(b.position.entry_price.value(), dec!(120));

    ledger.close_position(a.position.id, dec!(90)).await.unwrap();
    assert_eq!(ledger.balances().balance(UserId(2)).await.unwrap().value(), dec!(899.6));
}
