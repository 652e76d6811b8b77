// 11.0: every settlement outcome produces a notification for the app layer
// (toast, push, sound). delivery is fire and forget: a sink can drop or fail
// without touching the ledger mutation that caused it.

use crate::types::{OrderId, PositionId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Opened,
    Merged,
    Closed,
    Liquidated,
    TpFilled,
    SlFilled,
    LimitFilled,
    LimitCancelled,
}

/// Why a position left the OPEN state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    UserClosed,
    Liquidation,
    TakeProfit,
    StopLoss,
}

impl CloseReason {
    pub fn notification_kind(&self) -> NotificationKind {
        match self {
            CloseReason::UserClosed => NotificationKind::Closed,
            CloseReason::Liquidation => NotificationKind::Liquidated,
            CloseReason::TakeProfit => NotificationKind::TpFilled,
            CloseReason::StopLoss => NotificationKind::SlFilled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum NotificationTarget {
    Position(PositionId),
    Order(OrderId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub user_id: UserId,
    pub target: NotificationTarget,
    pub detail: String,
    pub timestamp: Timestamp,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        user_id: UserId,
        target: NotificationTarget,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            user_id,
            target,
            detail: detail.into(),
            timestamp: Timestamp::now(),
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notification: Notification) {}
}

/// Keeps notifications in memory. handy in tests and the simulator.
#[derive(Debug, Default)]
pub struct NotificationCollector {
    notifications: Mutex<Vec<Notification>>,
}

impl NotificationCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.notifications().iter().map(|n| n.kind).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut n) = self.notifications.lock() {
            n.clear();
        }
    }
}

impl NotificationSink for NotificationCollector {
    fn notify(&self, notification: Notification) {
        if let Ok(mut n) = self.notifications.lock() {
            n.push(notification);
        }
    }
}

/// Fans notifications out to any number of async listeners.
/// with no listener attached the send error is ignored.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, notification: Notification) {
        let _ = self.sender.send(notification);
    }
}
