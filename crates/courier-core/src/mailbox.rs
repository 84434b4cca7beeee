//! Bounded per-subscriber mailboxes based on `async-channel`.
//!
//! The broker holds a [`MailboxSender`] and only ever writes to it with
//! `try_send`. The subscriber owns the [`MailboxReceiver`] and drains it.

use crate::message::Message;
use std::sync::Arc;

/// The sending end of a subscriber's mailbox. Cloneable.
pub type MailboxSender = async_channel::Sender<Arc<Message>>;

/// The receiving end of a subscriber's mailbox.
pub type MailboxReceiver = async_channel::Receiver<Arc<Message>>;

/// Default capacity for bounded mailboxes.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 100;

/// Creates a new bounded mailbox channel pair.
///
/// A capacity of zero is raised to one.
#[must_use]
pub fn mailbox(capacity: usize) -> (MailboxSender, MailboxReceiver) {
    async_channel::bounded(capacity.max(1))
}

/// Close a mailbox for every handle that shares it.
///
/// Buffered messages stay readable; afterwards the receiver observes
/// end-of-stream. Returns `false` if the mailbox was already closed.
pub fn close_mailbox(sender: &MailboxSender) -> bool {
    sender.close()
}
