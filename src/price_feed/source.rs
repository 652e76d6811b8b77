//! Where raw frames come from.

use super::FeedError;
use crate::types::Symbol;
use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::debug;
use url::Url;

/// Text frames of one connection. An `Err` item or the end of the stream
/// means the connection is gone.
pub type FrameStream = BoxStream<'static, Result<String, FeedError>>;

#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn connect(&self, symbol: &Symbol) -> Result<FrameStream, FeedError>;
}

/// Live exchange stream over a websocket, one connection per symbol.
#[derive(Debug, Clone)]
pub struct WsPriceSource {
    url_template: String,
}

impl WsPriceSource {
    /// `url_template` must contain `{symbol}`.
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
        }
    }
}

#[async_trait]
impl PriceSource for WsPriceSource {
    async fn connect(&self, symbol: &Symbol) -> Result<FrameStream, FeedError> {
        let raw = self.url_template.replace("{symbol}", symbol.as_str());
        let url = Url::parse(&raw).map_err(|e| FeedError::Connect {
            url: raw.clone(),
            reason: e.to_string(),
        })?;

        let (ws, _) = connect_async(url.as_str()).await.map_err(|e| FeedError::Connect {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        debug!(%symbol, %url, "websocket connected");

        // pings are answered by tungstenite while we read
        let frames = ws.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
                Ok(Message::Close(frame)) => Some(Err(FeedError::Closed(
                    frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                ))),
                Ok(_) => None,
                Err(e) => Some(Err(FeedError::Stream(e.to_string()))),
            })
        });
        Ok(frames.boxed())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedFrame {
    pub delay: Duration,
    pub text: String,
}

impl ScriptedFrame {
    pub fn now(text: impl Into<String>) -> Self {
        Self::after(Duration::ZERO, text)
    }

    /// Delivered `delay` after the previous frame of the same session.
    pub fn after(delay: Duration, text: impl Into<String>) -> Self {
        Self {
            delay,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone)]
enum Session {
    Refuse(String),
    Frames(Vec<ScriptedFrame>),
}

/// Replays canned connections per symbol, in order. Each `session` is one
/// connection that ends after its last frame; each `refuse` is one failed
/// connect. Once the script runs out, connects succeed and stay silent.
#[derive(Debug, Default)]
pub struct ScriptedPriceSource {
    sessions: Mutex<HashMap<Symbol, VecDeque<Session>>>,
    attempts: Mutex<HashMap<Symbol, Vec<Instant>>>,
}

impl ScriptedPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(self, symbol: impl Into<Symbol>, frames: Vec<ScriptedFrame>) -> Self {
        self.push(symbol.into(), Session::Frames(frames));
        self
    }

    pub fn refuse(self, symbol: impl Into<Symbol>, reason: impl Into<String>) -> Self {
        self.push(symbol.into(), Session::Refuse(reason.into()));
        self
    }

    /// When each connect for `symbol` was attempted.
    pub fn attempts(&self, symbol: &Symbol) -> Vec<Instant> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }

    fn push(&self, symbol: Symbol, session: Session) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(symbol)
            .or_default()
            .push_back(session);
    }
}

#[async_trait]
impl PriceSource for ScriptedPriceSource {
    async fn connect(&self, symbol: &Symbol) -> Result<FrameStream, FeedError> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(symbol.clone())
            .or_default()
            .push(Instant::now());

        let next = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(symbol)
            .and_then(VecDeque::pop_front);

        match next {
            None => Ok(stream::pending().boxed()),
            Some(Session::Refuse(reason)) => Err(FeedError::Connect {
                url: format!("scripted://{symbol}"),
                reason,
            }),
            Some(Session::Frames(frames)) => Ok(stream::iter(frames)
                .then(|frame| async move {
                    tokio::time::sleep(frame.delay).await;
                    Ok(frame.text)
                })
                .boxed()),
        }
    }
}
