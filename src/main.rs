//! Paper trading simulation.
//!
//! Runs a scripted BTC price path through the real feed and settlement
//! engine: a market long that gets liquidated, and a limit order that fills
//! and then takes profit.

use paper_perps::*;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const STEP: Duration = Duration::from_millis(400);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("paper_perps=info")))
        .with(fmt::layer())
        .init();

    let mut config = TradingConfig::from_env()?;
    config.feed.symbols = vec!["btcusdt".to_string()];
    info!(max_leverage = config.limits.max_leverage, "starting paper trading simulation");

    println!("Paper Perps Simulation");
    println!("Scripted BTCUSDT stream, virtual balances\n");

    let storage = Arc::new(InMemoryStorage::new());
    let notifications = Arc::new(BroadcastSink::new(64));
    let mut inbox = notifications.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(note) = inbox.recv().await {
            println!("  [{:?}] {}: {}", note.kind, note.user_id, note.detail);
        }
    });

    let ledger = Arc::new(PositionLedger::new(
        config.fees.clone(),
        config.limits.clone(),
        storage,
        notifications.clone(),
    ));

    let alice = UserId(1);
    let bob = UserId(2);
    ledger.deposit(alice, Quote::new(dec!(1000))).await?;
    ledger.deposit(bob, Quote::new(dec!(500))).await?;
    println!("  Alice deposits 1000 USDT, Bob deposits 500 USDT\n");

    // Scenario 1: market long that will be liquidated
    let long = PositionRequest::new(alice, "btcusdt", Side::Long, 10, dec!(100), dec!(50000));
    let opened = ledger.open_market_position(&long).await?;
    println!(
        "  Alice longs 10x with 100 margin @ 50000, fee {}, liquidation at {:?}",
        opened.fee,
        opened.position.liquidation_price.map(|p| p.to_string())
    );
    println!("  Alice balance: {}\n", ledger.balances().balance(alice).await?);

    // Scenario 2: resting buy limit with take profit
    let limit = PositionRequest::new(bob, "btcusdt", Side::Long, 5, dec!(50), dec!(47000)).with_take_profit(dec!(49000));
    let order = ledger.submit_limit_order(&limit).await?;
    println!("  Bob rests a 5x buy limit @ 47000 (TP 49000), reserved {}\n", order.reserved());

    let frames = ["49500", "46900", "49100", "44900"]
        .iter()
        .enumerate()
        .map(|(i, price)| {
            let delay = if i == 0 { Duration::ZERO } else { STEP };
            ScriptedFrame::after(delay, format!(r#"{{"e":"aggTrade","p":"{price}"}}"#))
        })
        .collect();
    let source = Arc::new(ScriptedPriceSource::new().session("btcusdt", frames));

    let feed = PriceFeed::new(config.feed.clone(), source);
    let btc = Symbol::new("btcusdt");
    let ticks = feed
        .subscribe(&btc)
        .ok_or("feed is not configured for btcusdt")?;
    let settlement = Arc::new(SettlementEngine::new(ledger.clone())).spawn(ticks);

    println!("  Streaming prices: 49500 -> 46900 -> 49100 -> 44900\n");
    feed.start();
    tokio::time::sleep(STEP * 5).await;

    let last = feed.latest(&btc);
    feed.stop();
    drop(feed);
    settlement.await?;

    println!();
    let marks: HashMap<Symbol, Price> = last.map(|t| (t.symbol, t.price)).into_iter().collect();
    for (name, user) in [("Alice", alice), ("Bob", bob)] {
        let summary = ledger.account_summary(user, &marks).await?;
        let history = ledger.position_history(user).await?;
        println!(
            "  {name}: balance {}, open {}, pending {}, closed {}",
            summary.balance,
            summary.open_positions,
            summary.pending_orders,
            history.len()
        );
        for position in history {
            println!(
                "    {} {} closed at {:?}, realized pnl {:?}",
                position.symbol,
                position.side,
                position.close_price.map(|p| p.to_string()),
                position.realized_pnl.map(|p| p.to_string())
            );
        }
    }

    drop(ledger);
    drop(notifications);
    printer.await?;

    println!("\nSimulation complete.");
    Ok(())
}
