// 8.0: position ledger. single source of truth for open positions and pending
// limit orders. every mutation runs under a per-user lock and pairs a ledger
// write with a balance write, undoing the first if the second fails.

mod core;
mod locks;
mod orders;
mod positions;
mod queries;
mod results;

pub use self::core::PositionLedger;
pub use locks::UserLocks;
pub use results::{AccountSummary, CloseOutcome, LedgerError, OpenOutcome, PositionRequest};
