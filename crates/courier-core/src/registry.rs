//! Subscriber registry.
//!
//! Maps subscriber identities to mailbox handles. Dispatch takes the read
//! lock and may run alongside other readers; register and unregister take the
//! write lock. The lock is never held across an await point and every
//! mailbox write under it is a non-blocking `try_send`.

use crate::mailbox::{close_mailbox, MailboxSender};
use crate::message::Message;
use async_channel::TrySendError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Outcome of dispatching a single message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatch {
    /// Mailboxes that accepted the message.
    pub delivered: usize,
    /// Mailboxes that were full, dropped for that subscriber only.
    pub dropped_full: usize,
    /// Mailboxes whose receiver had gone away.
    pub dropped_closed: usize,
    /// The unicast recipient was not registered.
    pub missing_recipient: bool,
}

impl Dispatch {
    /// Whether the message was dropped for at least one target.
    #[must_use]
    pub fn has_drops(&self) -> bool {
        self.dropped_full > 0 || self.dropped_closed > 0 || self.missing_recipient
    }
}

#[derive(Debug, Default)]
struct Inner {
    subscribers: HashMap<String, MailboxSender>,
    /// Set by `close_all`; no further registrations are accepted.
    sealed: bool,
}

/// Identity to mailbox mapping.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the mailbox for `id`.
    ///
    /// A superseded mailbox is closed unless it shares the channel of the new
    /// handle. Returns `true` if an existing entry was replaced.
    ///
    /// Once the registry has been sealed by [`Registry::close_all`] the offered
    /// mailbox is closed and nothing is inserted.
    pub fn register(&self, id: impl Into<String>, mailbox: MailboxSender) -> bool {
        let id = id.into();
        let mut inner = self.inner.write();

        if inner.sealed {
            close_mailbox(&mailbox);
            debug!(subscriber = %id, "Registry sealed, rejecting mailbox");
            return false;
        }

        let replaced = match inner.subscribers.get(&id) {
            Some(previous) => {
                if !previous.same_channel(&mailbox) {
                    close_mailbox(previous);
                }
                true
            }
            None => false,
        };
        inner.subscribers.insert(id.clone(), mailbox);

        if replaced {
            debug!(subscriber = %id, "Replaced mailbox");
        } else {
            debug!(subscriber = %id, subscribers = inner.subscribers.len(), "Registered");
        }
        replaced
    }

    /// Remove `id` and close its mailbox.
    ///
    /// Absent identities and already-closed mailboxes are silently accepted.
    /// Returns `true` if an entry was removed.
    pub fn unregister(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.subscribers.remove(id) {
            Some(mailbox) => {
                close_mailbox(&mailbox);
                debug!(subscriber = %id, subscribers = inner.subscribers.len(), "Unregistered");
                true
            }
            None => false,
        }
    }

    /// Deliver a message by its broadcast/unicast policy.
    pub fn dispatch(&self, message: &Arc<Message>) -> Dispatch {
        let inner = self.inner.read();
        let mut outcome = Dispatch::default();

        if message.broadcast {
            for (id, mailbox) in &inner.subscribers {
                deliver(id, mailbox, message, &mut outcome);
            }
            trace!(
                sender = %message.sender,
                recipients = outcome.delivered,
                "Broadcast dispatched"
            );
        } else {
            match inner.subscribers.get(&message.recipient) {
                Some(mailbox) => deliver(&message.recipient, mailbox, message, &mut outcome),
                None => {
                    outcome.missing_recipient = true;
                    debug!(
                        sender = %message.sender,
                        recipient = %message.recipient,
                        "Recipient not connected, dropping message"
                    );
                }
            }
        }

        outcome
    }

    /// Close and remove every mailbox, then refuse further registrations.
    ///
    /// Returns the number of mailboxes closed.
    pub fn close_all(&self) -> usize {
        let mut inner = self.inner.write();
        inner.sealed = true;
        let count = inner.subscribers.len();
        for (_, mailbox) in inner.subscribers.drain() {
            close_mailbox(&mailbox);
        }
        count
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().subscribers.len()
    }

    /// Whether no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().subscribers.is_empty()
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().subscribers.contains_key(id)
    }

    /// Identities of all registered subscribers.
    #[must_use]
    pub fn subscribers(&self) -> Vec<String> {
        self.inner.read().subscribers.keys().cloned().collect()
    }
}

fn deliver(id: &str, mailbox: &MailboxSender, message: &Arc<Message>, outcome: &mut Dispatch) {
    match mailbox.try_send(Arc::clone(message)) {
        Ok(()) => outcome.delivered += 1,
        Err(TrySendError::Full(_)) => {
            outcome.dropped_full += 1;
            warn!(
                subscriber = %id,
                sender = %message.sender,
                broadcast = message.broadcast,
                "Mailbox full, dropping message"
            );
        }
        Err(TrySendError::Closed(_)) => {
            outcome.dropped_closed += 1;
            debug!(subscriber = %id, "Mailbox closed, dropping message");
        }
    }
}
