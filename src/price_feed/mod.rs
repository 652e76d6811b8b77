// 10.0: streaming price feed. one task per symbol owns the connection,
// reconnects with capped exponential backoff, normalizes frames into ticks,
// throttles them, and publishes the latest into a watch channel.
// nothing in here returns an error to callers; failures are logged.

mod feed;
mod source;
mod throttle;
mod tick;

pub use feed::PriceFeed;
pub use source::{FrameStream, PriceSource, ScriptedFrame, ScriptedPriceSource, WsPriceSource};
pub use throttle::{Backoff, Throttle};
pub use tick::{parse_tick, PriceTick};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("could not connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("stream closed by server: {0}")]
    Closed(String),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame has no usable price: {0}")]
    InvalidPrice(String),
}
