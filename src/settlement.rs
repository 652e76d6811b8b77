// 9.0 settlement.rs: reacts to every accepted tick.
// 9.1 liquidations first, 9.2 limit fills, 9.3 TP/SL last.
// a pass that is still busy from an earlier tick is skipped, not queued.
// one bad candidate never stops the rest of its pass.

use crate::conditional::{liquidation_hit, tp_sl_hit};
use crate::events::CloseReason;
use crate::ledger::{LedgerError, PositionLedger};
use crate::position::Position;
use crate::price_feed::PriceTick;
use crate::types::{OrderId, PositionId, Price, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementPass {
    Liquidation,
    LimitFill,
    TpSl,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub symbol: Symbol,
    pub price: Price,
    pub liquidated: Vec<PositionId>,
    pub filled: Vec<OrderId>,
    pub triggered: Vec<(PositionId, CloseReason)>,
    pub skipped: Vec<SettlementPass>,
    pub failures: usize,
}

impl TickReport {
    fn new(tick: &PriceTick) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            price: tick.price,
            liquidated: Vec::new(),
            filled: Vec::new(),
            triggered: Vec::new(),
            skipped: Vec::new(),
            failures: 0,
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.liquidated.is_empty() && self.filled.is_empty() && self.triggered.is_empty()
    }
}

pub struct SettlementEngine {
    ledger: Arc<PositionLedger>,
    liquidation_pass: Mutex<()>,
    fill_pass: Mutex<()>,
    tp_sl_pass: Mutex<()>,
}

impl SettlementEngine {
    pub fn new(ledger: Arc<PositionLedger>) -> Self {
        Self {
            ledger,
            liquidation_pass: Mutex::new(()),
            fill_pass: Mutex::new(()),
            tp_sl_pass: Mutex::new(()),
        }
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    pub async fn on_tick(&self, tick: &PriceTick) -> TickReport {
        let mut report = TickReport::new(tick);

        match self.liquidation_pass.try_lock() {
            Ok(_guard) => self.liquidate(tick, &mut report).await,
            Err(_) => report.skipped.push(SettlementPass::Liquidation),
        }
        match self.fill_pass.try_lock() {
            Ok(_guard) => self.fill_orders(tick, &mut report).await,
            Err(_) => report.skipped.push(SettlementPass::LimitFill),
        }
        match self.tp_sl_pass.try_lock() {
            Ok(_guard) => self.trigger_tp_sl(tick, &mut report).await,
            Err(_) => report.skipped.push(SettlementPass::TpSl),
        }

        if !report.skipped.is_empty() {
            debug!(symbol = %tick.symbol, skipped = ?report.skipped, "passes still busy, skipped");
        }
        if !report.is_quiet() {
            info!(
                symbol = %tick.symbol,
                price = %tick.price,
                liquidated = report.liquidated.len(),
                filled = report.filled.len(),
                triggered = report.triggered.len(),
                failures = report.failures,
                "tick settled"
            );
        }
        report
    }

    // 9.1: closes at the liquidation price, not the tick price
    async fn liquidate(&self, tick: &PriceTick, report: &mut TickReport) {
        let Some(positions) = self.scan_positions(SettlementPass::Liquidation, tick, report).await else {
            return;
        };

        for position in positions.iter().filter(|p| liquidation_hit(p, tick.price)) {
            let Some(liquidation_price) = position.liquidation_price else {
                continue;
            };
            match self
                .ledger
                .close_position_with_reason(position.id, liquidation_price, CloseReason::Liquidation)
                .await
            {
                Ok(_) => report.liquidated.push(position.id),
                Err(e) => record_failure(report, SettlementPass::Liquidation, &position.id.to_string(), &e),
            }
        }
    }

    // 9.2: fills happen at the order's limit price
    async fn fill_orders(&self, tick: &PriceTick, report: &mut TickReport) {
        let orders = match self.ledger.pending_orders_on(&tick.symbol).await {
            Ok(orders) => orders,
            Err(e) => {
                record_failure(report, SettlementPass::LimitFill, "order scan", &e);
                return;
            }
        };

        for order in orders.iter().filter(|o| o.should_fill(tick.price)) {
            match self.ledger.fill_limit_order(order.id, tick.price).await {
                Ok(_) => report.filled.push(order.id),
                Err(e) => record_failure(report, SettlementPass::LimitFill, &order.id.to_string(), &e),
            }
        }
    }

    // 9.3: anything liquidated above, or liquidatable at this price, is left alone
    async fn trigger_tp_sl(&self, tick: &PriceTick, report: &mut TickReport) {
        let Some(positions) = self.scan_positions(SettlementPass::TpSl, tick, report).await else {
            return;
        };
        let liquidated: HashSet<PositionId> = report.liquidated.iter().copied().collect();

        for position in &positions {
            if liquidated.contains(&position.id) || liquidation_hit(position, tick.price) {
                continue;
            }
            let Some((reason, target)) = tp_sl_hit(position, tick.price) else {
                continue;
            };
            match self.ledger.close_position_with_reason(position.id, target, reason).await {
                Ok(_) => report.triggered.push((position.id, reason)),
                Err(e) => record_failure(report, SettlementPass::TpSl, &position.id.to_string(), &e),
            }
        }
    }

    async fn scan_positions(
        &self,
        pass: SettlementPass,
        tick: &PriceTick,
        report: &mut TickReport,
    ) -> Option<Vec<Position>> {
        match self.ledger.open_positions_on(&tick.symbol).await {
            Ok(positions) => Some(positions),
            Err(e) => {
                record_failure(report, pass, "position scan", &e);
                None
            }
        }
    }

    /// Settle every tick published on `ticks` until the feed goes away.
    pub async fn run(&self, mut ticks: watch::Receiver<Option<PriceTick>>) {
        while ticks.changed().await.is_ok() {
            let tick = ticks.borrow_and_update().clone();
            if let Some(tick) = tick {
                self.on_tick(&tick).await;
            }
        }
        info!("price feed closed, settlement loop finished");
    }

    pub fn spawn(self: Arc<Self>, ticks: watch::Receiver<Option<PriceTick>>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(ticks).await })
    }
}

fn record_failure(report: &mut TickReport, pass: SettlementPass, candidate: &str, error: &LedgerError) {
    report.failures += 1;
    if error.is_not_found() {
        // settled by someone else between scan and close
        debug!(?pass, candidate, error = %error, "candidate already settled");
    } else {
        warn!(?pass, candidate, error = %error, "settlement failed for candidate");
    }
}
