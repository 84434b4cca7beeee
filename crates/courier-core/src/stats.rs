//! Broker counters.
//!
//! Drops are never reported to producers; these counters are the only place
//! they become observable besides the log.

use crate::registry::Dispatch;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by producers and the routing loop.
#[derive(Debug, Default)]
pub struct BrokerStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    dispatched: AtomicU64,
    delivered: AtomicU64,
    dropped_full: AtomicU64,
    dropped_closed: AtomicU64,
    missing_recipient: AtomicU64,
}

impl BrokerStats {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self, outcome: &Dispatch) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.delivered
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.dropped_full
            .fetch_add(outcome.dropped_full as u64, Ordering::Relaxed);
        self.dropped_closed
            .fetch_add(outcome.dropped_closed as u64, Ordering::Relaxed);
        if outcome.missing_recipient {
            self.missing_recipient.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            dropped_closed: self.dropped_closed.load(Ordering::Relaxed),
            missing_recipient: self.missing_recipient.load(Ordering::Relaxed),
        }
    }
}

/// Broker statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Messages accepted into the input queue.
    pub accepted: u64,
    /// Sends refused because the broker was cancelled.
    pub rejected: u64,
    /// Messages taken off the queue by the routing loop.
    pub dispatched: u64,
    /// Successful mailbox writes.
    pub delivered: u64,
    /// Mailbox writes dropped because the mailbox was full.
    pub dropped_full: u64,
    /// Mailbox writes dropped because the mailbox was closed.
    pub dropped_closed: u64,
    /// Unicast messages whose recipient was not registered.
    pub missing_recipient: u64,
}

impl StatsSnapshot {
    /// Total per-subscriber drops of every kind.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped_full + self.dropped_closed + self.missing_recipient
    }
}
