// paper-perps: simulated leveraged perpetual trading against a live price stream.
// virtual USDT balances, isolated margin per position, no real orders anywhere.
// prices come in over a websocket; every accepted tick runs liquidations,
// limit fills and TP/SL in that order.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: UserId, Symbol, Side, Price, Quote, Leverage
//   2.x  order.rs: resting limit orders and their status machine
//   2.1x conditional.rs: liquidation and TP/SL trigger checks
//   3.x  pricing.rs: liquidation price, pnl/roe, fees (pure)
//   4.x  position.rs: position rows, merge math, close settlement
//   5.x  storage.rs: persistence trait + in-memory store
//   6.x  account.rs: virtual balance reserve/credit/restore
//   7.x  config.rs: fees, leverage limit, feed settings, env presets
//   8.x  ledger/: open/merge/close, limit orders, queries, compensation
//   9.x  settlement.rs: per-tick liquidation, fill, TP/SL passes
//   10.x price_feed/: websocket source, normalization, throttle, reconnect
//   11.x events.rs: user notifications and sinks

// core trading modules
pub mod account;
pub mod ledger;
pub mod order;
pub mod position;
pub mod pricing;
pub mod types;

// triggers and settlement
pub mod conditional;
pub mod settlement;

// integration modules
pub mod config;
pub mod events;
pub mod price_feed;
pub mod storage;

// re exports for convenience
pub use account::{AccountBalance, AccountError};
pub use conditional::{liquidation_hit, tp_sl_hit, TriggerCondition};
pub use config::{ConfigError, Environment, FeeConfig, FeedConfig, LimitConfig, TradingConfig};
pub use events::{
    BroadcastSink, CloseReason, Notification, NotificationCollector, NotificationKind, NotificationSink,
    NotificationTarget, NullSink,
};
pub use ledger::{AccountSummary, CloseOutcome, LedgerError, OpenOutcome, PositionLedger, PositionRequest};
pub use order::{OrderStatus, PendingOrder};
pub use position::{merge_legs, settle_close, CloseSettlement, MergedLegs, Position, PositionStatus};
pub use price_feed::{
    parse_tick, Backoff, FeedError, PriceFeed, PriceSource, PriceTick, ScriptedFrame, ScriptedPriceSource,
    Throttle, WsPriceSource,
};
pub use pricing::{FeeTier, Pnl};
pub use settlement::{SettlementEngine, SettlementPass, TickReport};
pub use storage::{InMemoryStorage, Storage, StorageError, StorageOp};
pub use types::*;
