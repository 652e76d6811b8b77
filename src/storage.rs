//! Persistence seam.
//!
//! The ledger talks to a relational store through this trait. Any call may
//! fail with a transport or database error, and a failed call means the
//! write was not applied. `InMemoryStorage` is the bundled implementation;
//! it can inject failures so the compensation paths can be exercised.

use crate::order::{NewOrder, OrderPatch, OrderStatus, PendingOrder};
use crate::position::{NewPosition, Position, PositionPatch, PositionStatus};
use crate::types::{OrderId, PositionId, Quote, Side, Symbol, UserId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::RwLock;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("{0} does not exist in storage")]
    MissingRow(String),
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_balance(&self, user_id: UserId) -> StorageResult<Quote>;
    async fn set_balance(&self, user_id: UserId, balance: Quote) -> StorageResult<()>;

    async fn get_open_position(
        &self,
        user_id: UserId,
        symbol: &Symbol,
        side: Side,
    ) -> StorageResult<Option<Position>>;
    async fn get_position(&self, id: PositionId) -> StorageResult<Option<Position>>;
    async fn insert_position(&self, position: NewPosition) -> StorageResult<Position>;
    async fn update_position(&self, id: PositionId, patch: PositionPatch) -> StorageResult<Position>;

    async fn insert_order(&self, order: NewOrder) -> StorageResult<PendingOrder>;
    async fn get_order(&self, id: OrderId) -> StorageResult<Option<PendingOrder>>;
    async fn update_order(&self, id: OrderId, patch: OrderPatch) -> StorageResult<()>;
    async fn delete_order(&self, id: OrderId) -> StorageResult<()>;

    /// Every OPEN position on `symbol`.
    async fn open_positions(&self, symbol: &Symbol) -> StorageResult<Vec<Position>>;
    /// Every PENDING order on `symbol`.
    async fn pending_orders(&self, symbol: &Symbol) -> StorageResult<Vec<PendingOrder>>;
    async fn positions_for_user(&self, user_id: UserId) -> StorageResult<Vec<Position>>;
    async fn orders_for_user(&self, user_id: UserId) -> StorageResult<Vec<PendingOrder>>;
}

/// Storage calls that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    GetBalance,
    SetBalance,
    InsertPosition,
    UpdatePosition,
    InsertOrder,
    UpdateOrder,
    DeleteOrder,
}

#[derive(Debug, Default)]
struct MemoryState {
    balances: HashMap<UserId, Quote>,
    positions: BTreeMap<PositionId, Position>,
    orders: BTreeMap<OrderId, PendingOrder>,
    next_position_id: u64,
    next_order_id: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    state: RwLock<MemoryState>,
    // (op, calls to let through before failing)
    faults: Mutex<Vec<(StorageOp, u32)>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call of `op`.
    pub fn fail_next(&self, op: StorageOp) {
        self.fail_after(op, 0);
    }

    /// Let `skip` calls of `op` succeed, then fail one.
    pub fn fail_after(&self, op: StorageOp, skip: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push((op, skip));
        }
    }

    fn check(&self, op: StorageOp) -> StorageResult<()> {
        let Ok(mut faults) = self.faults.lock() else {
            return Ok(());
        };
        let Some(idx) = faults.iter().position(|(o, _)| *o == op) else {
            return Ok(());
        };
        if faults[idx].1 == 0 {
            faults.remove(idx);
            return Err(StorageError::Unavailable(format!("injected failure on {op:?}")));
        }
        faults[idx].1 -= 1;
        Ok(())
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_balance(&self, user_id: UserId) -> StorageResult<Quote> {
        self.check(StorageOp::GetBalance)?;
        let state = self.state.read().await;
        Ok(state.balances.get(&user_id).copied().unwrap_or_else(Quote::zero))
    }

    async fn set_balance(&self, user_id: UserId, balance: Quote) -> StorageResult<()> {
        self.check(StorageOp::SetBalance)?;
        self.state.write().await.balances.insert(user_id, balance);
        Ok(())
    }

    async fn get_open_position(
        &self,
        user_id: UserId,
        symbol: &Symbol,
        side: Side,
    ) -> StorageResult<Option<Position>> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .values()
            .find(|p| {
                p.user_id == user_id
                    && &p.symbol == symbol
                    && p.side == side
                    && p.status == PositionStatus::Open
            })
            .cloned())
    }

    async fn get_position(&self, id: PositionId) -> StorageResult<Option<Position>> {
        Ok(self.state.read().await.positions.get(&id).cloned())
    }

    async fn insert_position(&self, position: NewPosition) -> StorageResult<Position> {
        self.check(StorageOp::InsertPosition)?;
        let mut state = self.state.write().await;
        state.next_position_id += 1;
        let id = PositionId(state.next_position_id);
        let position = position.into_position(id);
        state.positions.insert(id, position.clone());
        Ok(position)
    }

    async fn update_position(&self, id: PositionId, patch: PositionPatch) -> StorageResult<Position> {
        self.check(StorageOp::UpdatePosition)?;
        let mut state = self.state.write().await;
        let position = state
            .positions
            .get_mut(&id)
            .ok_or_else(|| StorageError::MissingRow(id.to_string()))?;
        patch.apply(position);
        Ok(position.clone())
    }

    async fn insert_order(&self, order: NewOrder) -> StorageResult<PendingOrder> {
        self.check(StorageOp::InsertOrder)?;
        let mut state = self.state.write().await;
        state.next_order_id += 1;
        let id = OrderId(state.next_order_id);
        let order = order.into_order(id);
        state.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: OrderId) -> StorageResult<Option<PendingOrder>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn update_order(&self, id: OrderId, patch: OrderPatch) -> StorageResult<()> {
        self.check(StorageOp::UpdateOrder)?;
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StorageError::MissingRow(id.to_string()))?;
        patch.apply(order);
        Ok(())
    }

    async fn delete_order(&self, id: OrderId) -> StorageResult<()> {
        self.check(StorageOp::DeleteOrder)?;
        self.state
            .write()
            .await
            .orders
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StorageError::MissingRow(id.to_string()))
    }

    async fn open_positions(&self, symbol: &Symbol) -> StorageResult<Vec<Position>> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .values()
            .filter(|p| &p.symbol == symbol && p.is_open())
            .cloned()
            .collect())
    }

    async fn pending_orders(&self, symbol: &Symbol) -> StorageResult<Vec<PendingOrder>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| &o.symbol == symbol && o.status == OrderStatus::Pending)
            .cloned()
            .collect())
    }

    async fn positions_for_user(&self, user_id: UserId) -> StorageResult<Vec<Position>> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn orders_for_user(&self, user_id: UserId) -> StorageResult<Vec<PendingOrder>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }
}
