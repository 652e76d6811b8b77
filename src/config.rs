// 7.0 config.rs: all settings in one place. fees, leverage limits, price feed.
// 7.1 FeeConfig has the two fee tiers. 7.2 presets per environment, 7.3 env overrides.

use crate::pricing::FeeTier;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/** 7.1: fee rates as fractions of notional. 0.0004 = 0.04% */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeConfig {
    // Market orders and closes
    pub taker_fee_rate: Decimal,
    // Resting limit orders
    pub maker_fee_rate: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            taker_fee_rate: dec!(0.0004),
            maker_fee_rate: dec!(0.0002),
        }
    }
}

impl FeeConfig {
    pub fn rate(&self, tier: FeeTier) -> Decimal {
        match tier {
            FeeTier::Taker => self.taker_fee_rate,
            FeeTier::Maker => self.maker_fee_rate,
        }
    }
}

// Order entry limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    // Highest leverage a user may pick
    pub max_leverage: u32,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self { max_leverage: 125 }
    }
}

// Streaming price source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    // Stream endpoint, "{symbol}" is replaced per instrument
    pub url_template: String,
    // Instruments to track
    pub symbols: Vec<String>,
    // At most one accepted tick per interval per symbol
    pub throttle_ms: u64,
    // Reconnect backoff: base * multiplier^attempt, capped
    pub reconnect_base_ms: u64,
    pub reconnect_multiplier: u32,
    pub reconnect_max_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url_template: "wss://stream.binance.com:9443/ws/{symbol}@aggTrade".to_string(),
            symbols: vec!["btcusdt".to_string()],
            throttle_ms: 250,
            reconnect_base_ms: 1_000,
            reconnect_multiplier: 2,
            reconnect_max_ms: 30_000,
        }
    }
}

impl FeedConfig {
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn url_for(&self, symbol: &str) -> String {
        self.url_template.replace("{symbol}", symbol)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradingConfig {
    pub fees: FeeConfig,
    pub limits: LimitConfig,
    pub feed: FeedConfig,
}

impl TradingConfig {
    // 7.2: testnet stream, same economics
    pub fn testnet() -> Self {
        let mut config = Self::default();
        config.feed.url_template = "wss://stream.testnet.binance.vision/ws/{symbol}@trade".to_string();
        config
    }

    // lower leverage ceiling and slower reconnects for shared deployments
    pub fn production() -> Self {
        let mut config = Self::default();
        config.limits.max_leverage = 50;
        config.feed.reconnect_base_ms = 2_000;
        config.feed.reconnect_max_ms = 60_000;
        config
    }

    // 7.3: preset from PAPER_PERPS_ENV, then individual overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let env = match std::env::var("PAPER_PERPS_ENV") {
            Ok(name) => Environment::parse(&name)?,
            Err(_) => Environment::Development,
        };
        let mut config = env.config();

        if let Ok(url) = std::env::var("PAPER_PERPS_FEED_URL") {
            config.feed.url_template = url;
        }
        if let Ok(symbols) = std::env::var("PAPER_PERPS_SYMBOLS") {
            config.feed.symbols = symbols
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(ms) = std::env::var("PAPER_PERPS_THROTTLE_MS") {
            config.feed.throttle_ms = ms.parse().map_err(|_| ConfigError::InvalidFeed {
                reason: format!("PAPER_PERPS_THROTTLE_MS is not a number: {ms}"),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fees = &self.fees;
        if fees.maker_fee_rate < Decimal::ZERO || fees.taker_fee_rate < Decimal::ZERO {
            return Err(ConfigError::InvalidFees {
                reason: "Fee rates cannot be negative".to_string(),
            });
        }
        if fees.taker_fee_rate > dec!(0.01) {
            return Err(ConfigError::InvalidFees {
                reason: "Taker fee too high (>1%)".to_string(),
            });
        }
        if fees.maker_fee_rate > fees.taker_fee_rate {
            return Err(ConfigError::InvalidFees {
                reason: "Maker fee must not exceed taker fee".to_string(),
            });
        }

        if self.limits.max_leverage == 0 {
            return Err(ConfigError::InvalidLimits {
                reason: "Max leverage must be at least 1x".to_string(),
            });
        }

        let feed = &self.feed;
        if feed.symbols.is_empty() {
            return Err(ConfigError::InvalidFeed {
                reason: "Need at least 1 symbol".to_string(),
            });
        }
        if !feed.url_template.contains("{symbol}") {
            return Err(ConfigError::InvalidFeed {
                reason: "Feed url needs a {symbol} placeholder".to_string(),
            });
        }
        if let Err(e) = url::Url::parse(&feed.url_for("btcusdt")) {
            return Err(ConfigError::InvalidFeed {
                reason: format!("Feed url does not parse: {e}"),
            });
        }
        if feed.throttle_ms == 0 || feed.reconnect_base_ms == 0 {
            return Err(ConfigError::InvalidFeed {
                reason: "Throttle and reconnect base must be positive".to_string(),
            });
        }
        if feed.reconnect_multiplier == 0 || feed.reconnect_max_ms < feed.reconnect_base_ms {
            return Err(ConfigError::InvalidFeed {
                reason: "Reconnect multiplier must be >= 1 and max >= base".to_string(),
            });
        }

        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid fees: {reason}")]
    InvalidFees { reason: String },
    #[error("invalid limits: {reason}")]
    InvalidLimits { reason: String },
    #[error("invalid feed: {reason}")]
    InvalidFeed { reason: String },
    #[error("unknown environment {0:?}")]
    UnknownEnvironment(String),
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

impl Environment {
    pub fn config(&self) -> TradingConfig {
        match self {
            Environment::Development => TradingConfig::default(),
            Environment::Testnet => TradingConfig::testnet(),
            Environment::Production => TradingConfig::production(),
        }
    }

    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testnet" => Ok(Environment::Testnet),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::UnknownEnvironment(other.to_string())),
        }
    }
}
