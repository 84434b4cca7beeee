//! Chat message type.
//!
//! A message is mutable only until the broker dispatches it. The routing loop
//! stamps it and then shares it with every target mailbox as `Arc<Message>`.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock in nanoseconds since the Unix epoch.
///
/// Never returns zero, so a stamped message is always distinguishable from
/// an unstamped one.
#[must_use]
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(1, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .max(1)
}

/// A single chat event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Identity of the producer.
    pub sender: String,
    /// Target identity. Empty when `broadcast` is set.
    #[serde(default)]
    pub recipient: String,
    /// Text body.
    pub content: String,
    /// Deliver to every registered subscriber.
    #[serde(default)]
    pub broadcast: bool,
    /// Nanoseconds since the Unix epoch, `0` until stamped.
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    /// Create a unicast message for exactly one recipient.
    #[must_use]
    pub fn direct(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            content: content.into(),
            broadcast: false,
            timestamp: 0,
        }
    }

    /// Create a message for every registered subscriber.
    #[must_use]
    pub fn broadcast(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            recipient: String::new(),
            content: content.into(),
            broadcast: true,
            timestamp: 0,
        }
    }

    /// Pre-set the timestamp, e.g. when replaying recorded events.
    ///
    /// Values `<= 0` leave the message unstamped.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether a timestamp has been assigned.
    #[must_use]
    pub fn has_timestamp(&self) -> bool {
        self.timestamp > 0
    }

    /// Assign the current time unless a timestamp is already present.
    pub(crate) fn stamp(&mut self) {
        if !self.has_timestamp() {
            self.timestamp = now_nanos();
        }
    }
}
