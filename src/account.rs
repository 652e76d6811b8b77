//! Virtual USDT balance per user.
//!
//! Balances live in storage. Every mutation here is a read-modify-write, so
//! callers must hold the ledger's per-user lock around it. Each mutating call
//! returns the balance it replaced, which is what a compensating `restore`
//! puts back if the paired ledger write fails.

use crate::storage::{Storage, StorageError};
use crate::types::{Quote, UserId};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Quote, available: Quote },

    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Quote),

    #[error("Balance {balance} cannot absorb {amount}")]
    Overflow { balance: Quote, amount: Quote },

    #[error("Balance storage failed: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Clone)]
pub struct AccountBalance {
    storage: Arc<dyn Storage>,
}

impl AccountBalance {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn balance(&self, user_id: UserId) -> Result<Quote, AccountError> {
        Ok(self.storage.get_balance(user_id).await?)
    }

    /// Add virtual funds, e.g. the starting balance of a new user.
    pub async fn fund(&self, user_id: UserId, amount: Quote) -> Result<Quote, AccountError> {
        if !amount.is_positive() {
            return Err(AccountError::NonPositiveAmount(amount));
        }
        self.credit(user_id, amount).await?;
        self.balance(user_id).await
    }

    /// Take `amount` out of the balance. never leaves it negative.
    pub async fn reserve(&self, user_id: UserId, amount: Quote) -> Result<Quote, AccountError> {
        let prior = self.storage.get_balance(user_id).await?;
        if amount > prior {
            return Err(AccountError::InsufficientBalance {
                requested: amount,
                available: prior,
            });
        }
        let balance = prior
            .checked_sub(amount)
            .ok_or(AccountError::Overflow { balance: prior, amount })?;
        self.storage.set_balance(user_id, balance).await?;
        debug!(%user_id, %amount, %balance, "reserved");
        Ok(prior)
    }

    /// Put `amount` back. zero credits are skipped.
    pub async fn credit(&self, user_id: UserId, amount: Quote) -> Result<Quote, AccountError> {
        let prior = self.storage.get_balance(user_id).await?;
        if amount == Quote::zero() {
            return Ok(prior);
        }
        if amount.is_negative() {
            return Err(AccountError::NonPositiveAmount(amount));
        }
        let balance = prior
            .checked_add(amount)
            .ok_or(AccountError::Overflow { balance: prior, amount })?;
        self.storage.set_balance(user_id, balance).await?;
        debug!(%user_id, %amount, %balance, "credited");
        Ok(prior)
    }

    /// Compensation: write back a balance captured before a failed saga step.
    pub async fn restore(&self, user_id: UserId, prior: Quote) -> Result<(), AccountError> {
        self.storage.set_balance(user_id, prior).await?;
        Ok(())
    }
}
