// 10.2: feed lifecycle. owns one watch channel and one connection task per symbol.

use super::source::PriceSource;
use super::throttle::{Backoff, Throttle};
use super::tick::{parse_tick, PriceTick};
use crate::config::FeedConfig;
use crate::types::Symbol;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

type TickSender = Arc<watch::Sender<Option<PriceTick>>>;

/// Subscribers see the latest accepted tick per symbol; ticks they were
/// too slow to observe are overwritten.
pub struct PriceFeed {
    config: FeedConfig,
    source: Arc<dyn PriceSource>,
    channels: HashMap<Symbol, TickSender>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl PriceFeed {
    pub fn new(config: FeedConfig, source: Arc<dyn PriceSource>) -> Self {
        let channels = config
            .symbols
            .iter()
            .map(|s| (Symbol::new(s), Arc::new(watch::channel(None).0)))
            .collect();

        Self {
            config,
            source,
            channels,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the connection tasks on the current runtime. A second call
    /// while running does nothing.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for (symbol, sender) in &self.channels {
            let worker = SymbolWorker {
                symbol: symbol.clone(),
                url: self.config.url_for(symbol.as_str()),
                source: self.source.clone(),
                sender: sender.clone(),
                throttle: Throttle::new(self.config.throttle_interval()),
                backoff: Backoff::new(
                    self.config.reconnect_base(),
                    self.config.reconnect_multiplier,
                    self.config.reconnect_max(),
                ),
            };
            tasks.push(tokio::spawn(worker.run()));
        }
        info!(symbols = self.channels.len(), "price feed started");
    }

    /// Abort every connection task. No reconnect is scheduled afterwards.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("price feed stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.channels.keys()
    }

    /// `None` for a symbol the feed is not configured for.
    pub fn subscribe(&self, symbol: &Symbol) -> Option<watch::Receiver<Option<PriceTick>>> {
        self.channels.get(symbol).map(|sender| sender.subscribe())
    }

    pub fn latest(&self, symbol: &Symbol) -> Option<PriceTick> {
        self.channels
            .get(symbol)
            .and_then(|sender| sender.borrow().clone())
    }
}

impl Drop for PriceFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SymbolWorker {
    symbol: Symbol,
    url: String,
    source: Arc<dyn PriceSource>,
    sender: TickSender,
    throttle: Throttle,
    backoff: Backoff,
}

impl SymbolWorker {
    async fn run(mut self) {
        loop {
            match self.source.connect(&self.symbol).await {
                Ok(mut frames) => {
                    self.backoff.reset();
                    info!(symbol = %self.symbol, url = %self.url, "price stream connected");

                    while let Some(frame) = frames.next().await {
                        match frame {
                            Ok(text) => self.on_frame(&text),
                            Err(e) => {
                                warn!(symbol = %self.symbol, error = %e, "price stream failed");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    self.backoff.record_failure();
                    warn!(
                        symbol = %self.symbol,
                        failures = self.backoff.failures(),
                        error = %e,
                        "price stream connect failed"
                    );
                }
            }

            let delay = self.backoff.delay();
            warn!(symbol = %self.symbol, ?delay, "price stream disconnected, reconnecting");
            tokio::time::sleep(delay).await;
        }
    }

    fn on_frame(&mut self, text: &str) {
        let tick = match parse_tick(&self.symbol, text) {
            Ok(tick) => tick,
            Err(e) => {
                debug!(symbol = %self.symbol, error = %e, "dropped frame");
                return;
            }
        };

        if !self.throttle.accept(Instant::now()) {
            trace!(symbol = %self.symbol, price = %tick.price, "throttled tick");
            return;
        }
        self.sender.send_replace(Some(tick));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price_feed::source::{ScriptedFrame, ScriptedPriceSource};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn config() -> FeedConfig {
        FeedConfig {
            symbols: vec!["btcusdt".to_string()],
            throttle_ms: 250,
            reconnect_base_ms: 1_000,
            reconnect_multiplier: 2,
            reconnect_max_ms: 30_000,
            ..FeedConfig::default()
        }
    }

    fn frame(price: &str) -> String {
        format!(r#"{{"p":"{price}","T":1}}"#)
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_and_throttles() {
        let source = Arc::new(ScriptedPriceSource::new().session(
            "btcusdt",
            vec![
                ScriptedFrame::now(frame("100")),
                ScriptedFrame::after(Duration::from_millis(50), frame("101")),
                ScriptedFrame::after(Duration::from_millis(50), "garbage"),
                ScriptedFrame::after(Duration::from_millis(200), frame("102")),
            ],
        ));
        let feed = PriceFeed::new(config(), source);
        let btc = Symbol::new("btcusdt");
        let mut rx = feed.subscribe(&btc).unwrap();
        feed.start();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().map(|t| t.price.value()), Some(dec!(100)));

        // 101 lands inside the 250ms window and is dropped
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().map(|t| t.price.value()), Some(dec!(102)));
        assert_eq!(feed.latest(&btc).map(|t| t.price.value()), Some(dec!(102)));
        feed.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backoff_grows_and_resets() {
        let btc = Symbol::new("btcusdt");
        let source = Arc::new(
            ScriptedPriceSource::new()
                .refuse("btcusdt", "down")
                .refuse("btcusdt", "down")
                .session("btcusdt", vec![ScriptedFrame::now(frame("100"))])
                .refuse("btcusdt", "down"),
        );
        let feed = PriceFeed::new(config(), source.clone());
        feed.start();

        tokio::time::sleep(Duration::from_secs(20)).await;
        let attempts = source.attempts(&btc);
        assert!(attempts.len() >= 5);

        let gaps: Vec<u64> = attempts
            .windows(2)
            .map(|w| w[1].duration_since(w[0]).as_millis() as u64)
            .collect();
        // refused, refused, connected then dropped, refused
        assert_eq!(&gaps[..4], &[2_000, 4_000, 1_000, 2_000]);
        feed.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_and_stop_halts_reconnects() {
        let btc = Symbol::new("btcusdt");
        let source = Arc::new(ScriptedPriceSource::new().refuse("btcusdt", "down"));
        let feed = PriceFeed::new(config(), source.clone());

        feed.start();
        feed.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.attempts(&btc).len(), 1);

        feed.stop();
        assert!(!feed.is_running());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.attempts(&btc).len(), 1);
    }

    #[test]
    fn test_unknown_symbol() {
        let feed = PriceFeed::new(config(), Arc::new(ScriptedPriceSource::new()));
        assert!(feed.subscribe(&Symbol::new("ethusdt")).is_none());
        assert!(feed.latest(&Symbol::new("btcusdt")).is_none());
    }
}
