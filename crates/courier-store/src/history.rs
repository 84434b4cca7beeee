//! Chat history.

use courier_core::Message;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Initial capacity of the history buffer.
const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Message store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store refused the write.
    #[error("Message store unavailable: {0}")]
    Unavailable(String),
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Identity of the producer.
    pub sender: String,
    /// Text body.
    pub content: String,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
}

impl StoredMessage {
    /// Create a stored message.
    #[must_use]
    pub fn new(sender: impl Into<String>, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            timestamp,
        }
    }
}

impl From<&Message> for StoredMessage {
    fn from(msg: &Message) -> Self {
        Self::new(msg.sender.clone(), msg.content.clone(), msg.timestamp)
    }
}

/// Append-only, ordered message history.
///
/// Readers always receive an independent copy.
#[derive(Debug)]
pub struct MessageStore {
    messages: RwLock<Vec<StoredMessage>>,
}

impl MessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::with_capacity(DEFAULT_HISTORY_CAPACITY)),
        }
    }

    /// Append a message.
    ///
    /// # Errors
    ///
    /// The in-memory store never fails; the result leaves room for backends
    /// that can.
    pub fn add_message(&self, message: impl Into<StoredMessage>) -> Result<(), StoreError> {
        let message = message.into();
        trace!(sender = %message.sender, "Storing message");
        self.messages.write().push(message);
        Ok(())
    }

    /// Get stored messages in insertion order.
    ///
    /// `None` or an empty sender returns everything. A sender without messages
    /// yields an empty list.
    ///
    /// # Errors
    ///
    /// The in-memory store never fails.
    pub fn get_messages(&self, sender: Option<&str>) -> Result<Vec<StoredMessage>, StoreError> {
        let messages = self.messages.read();
        let copy = match sender.filter(|s| !s.is_empty()) {
            None => messages.clone(),
            Some(sender) => messages
                .iter()
                .filter(|m| m.sender == sender)
                .cloned()
                .collect(),
        };
        Ok(copy)
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}
