//! Read-only views for the app layer.

use super::core::PositionLedger;
use super::results::{AccountSummary, LedgerError};
use crate::order::PendingOrder;
use crate::position::Position;
use crate::types::{Price, Quote, Symbol, UserId};
use std::collections::HashMap;

impl PositionLedger {
    pub async fn open_positions(&self, user_id: UserId) -> Result<Vec<Position>, LedgerError> {
        let mut positions = self.storage.positions_for_user(user_id).await?;
        positions.retain(Position::is_open);
        Ok(positions)
    }

    pub async fn pending_orders(&self, user_id: UserId) -> Result<Vec<PendingOrder>, LedgerError> {
        let mut orders = self.storage.orders_for_user(user_id).await?;
        orders.retain(PendingOrder::is_pending);
        Ok(orders)
    }

    /// Every OPEN position on `symbol`, across users.
    pub async fn open_positions_on(&self, symbol: &Symbol) -> Result<Vec<Position>, LedgerError> {
        Ok(self.storage.open_positions(symbol).await?)
    }

    /// Every PENDING order on `symbol`, across users.
    pub async fn pending_orders_on(&self, symbol: &Symbol) -> Result<Vec<PendingOrder>, LedgerError> {
        Ok(self.storage.pending_orders(symbol).await?)
    }

    /// Closed positions, most recently closed first.
    pub async fn position_history(&self, user_id: UserId) -> Result<Vec<Position>, LedgerError> {
        let mut closed = self.storage.positions_for_user(user_id).await?;
        closed.retain(|p| !p.is_open());
        closed.sort_by(|a, b| b.closed_at.cmp(&a.closed_at).then(b.id.cmp(&a.id)));
        Ok(closed)
    }

    /// Balance and exposure. Positions on a symbol missing from `marks`
    /// count zero unrealized pnl.
    pub async fn account_summary(
        &self,
        user_id: UserId,
        marks: &HashMap<Symbol, Price>,
    ) -> Result<AccountSummary, LedgerError> {
        let balance = self.balances.balance(user_id).await?;
        let positions = self.open_positions(user_id).await?;
        let orders = self.pending_orders(user_id).await?;

        let locked_margin: Quote = positions.iter().map(|p| p.margin).sum();
        let reserved_for_orders: Quote = orders.iter().map(PendingOrder::reserved).sum();
        let unrealized_pnl: Quote = positions
            .iter()
            .filter_map(|p| marks.get(&p.symbol).map(|mark| Quote::new(p.unrealized_pnl(*mark).pnl)))
            .sum();

        Ok(AccountSummary {
            user_id,
            balance,
            locked_margin,
            reserved_for_orders,
            unrealized_pnl,
            equity: balance.add(locked_margin).add(reserved_for_orders).add(unrealized_pnl),
            open_positions: positions.len(),
            pending_orders: orders.len(),
        })
    }
}
