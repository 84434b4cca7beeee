//! The Courier message broker.
//!
//! Producers push messages into a bounded input queue with [`Broker::send`].
//! A single routing loop ([`Broker::run`]) drains the queue in acceptance
//! order, stamps each message and fans it out through the [`Registry`].
//!
//! Shutdown is driven by a [`CancellationToken`]. Cancellation unblocks
//! producers waiting on a full queue and makes the loop exit without draining
//! what is left. Loop exit then publishes a separate "stopped" signal so
//! teardown can be sequenced after the loop has provably stopped.

use crate::mailbox::{
    close_mailbox, mailbox, MailboxReceiver, MailboxSender, DEFAULT_MAILBOX_CAPACITY,
};
use crate::message::Message;
use crate::registry::Registry;
use crate::stats::{BrokerStats, StatsSnapshot};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Default capacity of the input queue.
pub const DEFAULT_INPUT_CAPACITY: usize = 100;

/// Broker errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker has been cancelled or has stopped.
    #[error("Broker cancelled")]
    Cancelled,

    /// The input queue is full (non-blocking send only).
    #[error("Broker input queue is full")]
    QueueFull,

    /// The routing loop has already been started.
    #[error("Broker routing loop already started")]
    AlreadyRunning,
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Capacity of the input queue shared by all producers.
    pub input_capacity: usize,
    /// Capacity of mailboxes created through [`Broker::mailbox`].
    pub mailbox_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            input_capacity: DEFAULT_INPUT_CAPACITY,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

/// Broker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BrokerState {
    /// Constructed, routing loop not started.
    Created = 0,
    /// Routing loop running.
    Running = 1,
    /// Routing loop exited. Terminal.
    Terminated = 2,
}

impl BrokerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            _ => Self::Terminated,
        }
    }
}

struct Shared {
    config: BrokerConfig,
    registry: Registry,
    stats: BrokerStats,
    input: mpsc::Sender<Message>,
    /// Taken by the routing loop when it starts.
    queue: Mutex<Option<mpsc::Receiver<Message>>>,
    /// Child of the token handed to the constructor.
    cancel: CancellationToken,
    /// Fired exactly once, when the routing loop can no longer touch state.
    stopped: CancellationToken,
    state: AtomicU8,
}

impl Shared {
    fn take_queue(&self) -> Option<mpsc::Receiver<Message>> {
        self.queue.lock().take()
    }

    /// Terminate a broker whose loop never took the queue.
    ///
    /// Returns `true` if this call published termination.
    fn terminate_idle(&self) -> bool {
        let idle = self.take_queue().is_some();
        if idle {
            self.terminate();
        }
        idle
    }

    /// Settle a cancellation that arrived through the parent token before the
    /// loop ever ran.
    fn observe_cancel(&self) {
        if self.cancel.is_cancelled() && self.terminate_idle() {
            debug!("Broker cancelled before it ran");
        }
    }

    fn terminate(&self) {
        self.state
            .store(BrokerState::Terminated as u8, Ordering::Release);
        self.stopped.cancel();
    }
}

/// Publishes termination when the routing loop exits, including by panic or
/// task abort.
struct TerminateOnDrop<'a>(&'a Shared);

impl Drop for TerminateOnDrop<'_> {
    fn drop(&mut self) {
        self.0.terminate();
        debug!("Broker routing loop stopped");
    }
}

/// The chat message broker.
///
/// `Broker` is a cheap handle; clones share the same registry, queue and
/// lifecycle.
#[derive(Clone)]
pub struct Broker {
    shared: Arc<Shared>,
}

impl Broker {
    /// Create a broker with default configuration.
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self::with_config(BrokerConfig::default(), token)
    }

    /// Create a broker with custom configuration.
    ///
    /// Cancelling `token` shuts the broker down. [`Broker::stop`] never
    /// cancels `token` itself.
    #[must_use]
    pub fn with_config(config: BrokerConfig, token: CancellationToken) -> Self {
        info!("Creating broker with config: {:?}", config);
        let (input, queue) = mpsc::channel(config.input_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                registry: Registry::new(),
                stats: BrokerStats::new(),
                input,
                queue: Mutex::new(Some(queue)),
                cancel: token.child_token(),
                stopped: CancellationToken::new(),
                state: AtomicU8::new(BrokerState::Created as u8),
            }),
        }
    }

    /// Get the broker configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BrokerState {
        self.shared.observe_cancel();
        BrokerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Whether the routing loop has stopped for good.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.observe_cancel();
        self.shared.stopped.is_cancelled()
    }

    /// Wait until the routing loop has stopped.
    ///
    /// Resolves once cancellation has fired and no loop is running, including
    /// when [`Broker::run`] was never called.
    pub async fn stopped(&self) {
        let shared = &*self.shared;
        tokio::select! {
            biased;

            () = shared.stopped.cancelled() => {}

            () = shared.cancel.cancelled() => {
                // A running loop holds the queue and publishes on exit.
                shared.terminate_idle();
                shared.stopped.cancelled().await;
            }
        }
    }

    /// Get broker statistics.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Whether `id` currently has a mailbox.
    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.shared.registry.contains(id)
    }

    /// Create a mailbox pair with the configured capacity.
    #[must_use]
    pub fn mailbox(&self) -> (MailboxSender, MailboxReceiver) {
        mailbox(self.shared.config.mailbox_capacity)
    }

    /// Enqueue a message for routing.
    ///
    /// Waits only while the input queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Cancelled`] if the broker is cancelled before the
    /// queue accepts the message. The message is not enqueued in that case.
    pub async fn send(&self, message: Message) -> Result<(), BrokerError> {
        let result = tokio::select! {
            biased;

            () = self.shared.cancel.cancelled() => Err(BrokerError::Cancelled),

            sent = self.shared.input.send(message) => sent.map_err(|_| BrokerError::Cancelled),
        };
        self.record_send(&result);
        result
    }

    /// Enqueue a message without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::QueueFull`] if the queue has no free slot, or
    /// [`BrokerError::Cancelled`] if the broker is shutting down.
    pub fn try_send(&self, message: Message) -> Result<(), BrokerError> {
        let result = if self.is_cancelled() {
            Err(BrokerError::Cancelled)
        } else {
            self.shared.input.try_send(message).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BrokerError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => BrokerError::Cancelled,
            })
        };
        self.record_send(&result);
        result
    }

    fn record_send(&self, result: &Result<(), BrokerError>) {
        match result {
            Ok(()) => self.shared.stats.record_accepted(),
            Err(BrokerError::Cancelled) => self.shared.stats.record_rejected(),
            Err(_) => {}
        }
    }

    /// Register a subscriber mailbox, replacing any existing one.
    ///
    /// The replaced mailbox is closed. Once the broker is cancelled the offered
    /// mailbox is closed and nothing is registered.
    pub fn register(&self, id: impl Into<String>, mailbox: MailboxSender) {
        if self.is_cancelled() || self.state() == BrokerState::Terminated {
            self.shared.observe_cancel();
            close_mailbox(&mailbox);
            debug!("Broker cancelled, ignoring registration");
            return;
        }
        self.shared.registry.register(id, mailbox);
    }

    /// Remove a subscriber and close its mailbox.
    ///
    /// Unknown identities are ignored.
    pub fn unregister(&self, id: &str) {
        if self.state() == BrokerState::Terminated {
            return;
        }
        self.shared.registry.unregister(id);
    }

    /// Run the routing loop until cancellation.
    ///
    /// Intended to be spawned once as the broker's only long-lived task.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Cancelled`] if the broker was cancelled before
    /// the loop could start, or [`BrokerError::AlreadyRunning`] if the loop
    /// was started before.
    pub async fn run(&self) -> Result<(), BrokerError> {
        let shared = &*self.shared;
        let Some(mut queue) = shared.take_queue() else {
            return Err(if self.is_cancelled() || self.state() == BrokerState::Terminated {
                BrokerError::Cancelled
            } else {
                BrokerError::AlreadyRunning
            });
        };

        let _terminate = TerminateOnDrop(shared);
        shared
            .state
            .store(BrokerState::Running as u8, Ordering::Release);
        info!("Broker running");

        loop {
            tokio::select! {
                biased;

                () = shared.cancel.cancelled() => {
                    info!(pending = queue.len(), "Broker shutting down");
                    break;
                }

                next = queue.recv() => {
                    let Some(mut message) = next else {
                        break;
                    };
                    message.stamp();
                    let message = Arc::new(message);
                    let outcome = shared.registry.dispatch(&message);
                    shared.stats.record_dispatch(&outcome);
                    trace!(
                        sender = %message.sender,
                        broadcast = message.broadcast,
                        delivered = outcome.delivered,
                        "Dispatched"
                    );
                }
            }
        }

        Ok(())
    }

    /// Request the routing loop to stop.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
        // A loop that never started cannot publish its own termination.
        self.shared.terminate_idle();
    }

    /// Stop the loop, wait for it to exit, then close every mailbox.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.stop();
        self.stopped().await;
        let closed = self.shared.registry.close_all();
        info!(mailboxes = closed, "Broker shut down");
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    type Routing = JoinHandle<Result<(), BrokerError>>;

    fn spawn_broker(config: BrokerConfig) -> (Broker, CancellationToken, Routing) {
        let token = CancellationToken::new();
        let broker = Broker::with_config(config, token.clone());
        let handle = tokio::spawn({
            let broker = broker.clone();
            async move { broker.run().await }
        });
        (broker, token, handle)
    }

    async fn wait_running(broker: &Broker) {
        timeout(WAIT, async {
            while broker.state() != BrokerState::Running {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("routing loop did not start");
    }

    async fn wait_dispatched(broker: &Broker, count: u64) {
        timeout(WAIT, async {
            while broker.stats().dispatched < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("messages were not dispatched in time");
    }

    #[tokio::test]
    async fn test_dispatch_preserves_acceptance_order() {
        let (broker, _token, _handle) = spawn_broker(BrokerConfig::default());
        let (tx, rx) = mailbox(1000);
        broker.register("alice", tx);

        for i in 0..500 {
            broker
                .send(Message::direct("bob", "alice", i.to_string()))
                .await
                .unwrap();
        }
        wait_dispatched(&broker, 500).await;

        for i in 0..500 {
            assert_eq!(rx.try_recv().unwrap().content, i.to_string());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_deliver_everything() {
        let (broker, _token, _handle) = spawn_broker(BrokerConfig {
            input_capacity: 8,
            ..BrokerConfig::default()
        });
        let (tx, rx) = mailbox(4000);
        broker.register("sink", tx);

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let broker = broker.clone();
                tokio::spawn(async move {
                    for i in 0..1000 {
                        let msg = Message::direct(format!("p{p}"), "sink", format!("{p}:{i}"));
                        broker.send(msg).await.unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }
        wait_dispatched(&broker, 4000).await;

        let mut last = [-1i64; 4];
        let mut total = 0;
        while let Ok(msg) = rx.try_recv() {
            let (p, i) = msg.content.split_once(':').unwrap();
            let (p, i): (usize, i64) = (p.parse().unwrap(), i.parse().unwrap());
            // Each producer's own messages keep their order
            assert!(i > last[p]);
            last[p] = i;
            total += 1;
        }
        assert_eq!(total, 4000);
        assert_eq!(broker.stats().delivered, 4000);
    }

    #[tokio::test]
    async fn test_preset_timestamp_is_kept() {
        let (broker, _token, _handle) = spawn_broker(BrokerConfig::default());
        let (tx, rx) = mailbox(4);
        broker.register("alice", tx);

        broker
            .send(Message::direct("bob", "alice", "replay").with_timestamp(1_234))
            .await
            .unwrap();
        broker
            .send(Message::direct("bob", "alice", "live"))
            .await
            .unwrap();

        let replay = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        let live = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(replay.timestamp, 1_234);
        assert!(live.timestamp > 0);
    }

    #[tokio::test]
    async fn test_broadcast_is_identical_for_all() {
        let (broker, _token, _handle) = spawn_broker(BrokerConfig::default());
        let (tx_a, rx_a) = mailbox(4);
        let (tx_b, rx_b) = mailbox(4);
        broker.register("a", tx_a);
        broker.register("b", tx_b);

        broker.send(Message::broadcast("c", "hello")).await.unwrap();

        let a = timeout(WAIT, rx_a.recv()).await.unwrap().unwrap();
        let b = timeout(WAIT, rx_b.recv()).await.unwrap().unwrap();
        assert_eq!(a.content, "hello");
        assert_eq!(a.content, b.content);
        assert_eq!(a.timestamp, b.timestamp);
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_second_message() {
        let (broker, _token, _handle) = spawn_broker(BrokerConfig::default());
        let (tx, rx) = mailbox(1);
        broker.register("a", tx);

        assert!(broker.send(Message::direct("b", "a", "first")).await.is_ok());
        assert!(broker.send(Message::direct("b", "a", "second")).await.is_ok());
        wait_dispatched(&broker, 2).await;

        assert_eq!(rx.len(), 1);
        assert_eq!(rx.try_recv().unwrap().content, "first");
        assert!(rx.try_recv().is_err());
        assert_eq!(broker.stats().dropped_full, 1);
    }

    #[tokio::test]
    async fn test_unicast_to_unknown_recipient() {
        let (broker, _token, _handle) = spawn_broker(BrokerConfig::default());
        let (tx, rx) = mailbox(4);
        broker.register("alice", tx);

        assert!(broker
            .send(Message::direct("bob", "ghost", "anyone?"))
            .await
            .is_ok());
        wait_dispatched(&broker, 1).await;

        assert!(rx.is_empty());
        let stats = broker.stats();
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.missing_recipient, 1);
    }

    #[tokio::test]
    async fn test_unregister_twice_and_unknown() {
        let (broker, _token, _handle) = spawn_broker(BrokerConfig::default());
        let (tx, rx) = mailbox(4);
        broker.register("alice", tx);

        broker.unregister("alice");
        broker.unregister("alice");
        broker.unregister("never-registered");

        assert!(!broker.is_registered("alice"));
        assert!(timeout(WAIT, rx.recv()).await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_blocked_send_unblocks_on_cancel() {
        let token = CancellationToken::new();
        let broker = Broker::with_config(
            BrokerConfig {
                input_capacity: 1,
                ..BrokerConfig::default()
            },
            token.clone(),
        );

        // Routing loop is not running, so the queue stays full
        broker.send(Message::broadcast("a", "fill")).await.unwrap();
        let blocked = tokio::spawn({
            let broker = broker.clone();
            async move { broker.send(Message::broadcast("a", "blocked")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        token.cancel();
        let result = timeout(WAIT, blocked).await.unwrap().unwrap();
        assert_eq!(result, Err(BrokerError::Cancelled));

        assert_eq!(
            broker.send(Message::broadcast("a", "late")).await,
            Err(BrokerError::Cancelled)
        );
        assert_eq!(
            broker.try_send(Message::broadcast("a", "late")),
            Err(BrokerError::Cancelled)
        );
        assert_eq!(broker.stats().rejected, 3);
    }

    #[tokio::test]
    async fn test_nothing_dispatched_after_cancel() {
        let (broker, token, handle) = spawn_broker(BrokerConfig::default());
        let (tx, rx) = mailbox(16);
        broker.register("alice", tx);

        token.cancel();
        timeout(WAIT, handle).await.unwrap().unwrap().unwrap();

        assert!(broker.send(Message::direct("b", "alice", "late")).await.is_err());
        assert!(rx.is_empty());
        assert_eq!(broker.stats().dispatched, 0);
    }

    #[tokio::test]
    async fn test_cancel_discards_queued_messages() {
        let token = CancellationToken::new();
        let broker = Broker::new(token.clone());
        let (tx, rx) = mailbox(16);
        broker.register("alice", tx);

        for i in 0..5 {
            broker
                .send(Message::direct("bob", "alice", i.to_string()))
                .await
                .unwrap();
        }
        token.cancel();

        assert_eq!(timeout(WAIT, broker.run()).await.unwrap(), Ok(()));
        assert_eq!(broker.stats().accepted, 5);
        assert_eq!(broker.stats().dispatched, 0);
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_run_is_terminal() {
        let token = CancellationToken::new();
        let broker = Broker::new(token.clone());
        token.cancel();

        let (tx, rx) = mailbox(4);
        broker.register("late", tx);
        assert!(!broker.is_registered("late"));
        assert!(rx.is_closed());

        assert_eq!(broker.state(), BrokerState::Terminated);
        timeout(WAIT, broker.stopped()).await.unwrap();
        assert_eq!(broker.run().await, Err(BrokerError::Cancelled));
    }

    #[tokio::test]
    async fn test_stopped_resolves_when_cancelled_idle() {
        let token = CancellationToken::new();
        let broker = Broker::new(token.clone());

        let waiter = tokio::spawn({
            let broker = broker.clone();
            async move { broker.stopped().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        token.cancel();
        timeout(WAIT, waiter).await.unwrap().unwrap();
        assert!(broker.is_stopped());
    }

    #[tokio::test]
    async fn test_run_after_stop_is_cancelled() {
        let broker = Broker::new(CancellationToken::new());

        broker.stop();
        assert_eq!(broker.run().await, Err(BrokerError::Cancelled));
        assert_eq!(broker.state(), BrokerState::Terminated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_churn_during_broadcast_loop() {
        let (broker, _token, _handle) = spawn_broker(BrokerConfig::default());
        let (tx, rx) = mailbox(1000);
        broker.register("stable", tx);

        let churners: Vec<_> = (0..4)
            .map(|t| {
                let broker = broker.clone();
                tokio::spawn(async move {
                    for i in 0..250 {
                        let id = format!("churn-{t}-{i}");
                        let (tx, _rx) = broker.mailbox();
                        broker.register(id.as_str(), tx);
                        broker.unregister(&id);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for i in 0..1000 {
            broker
                .send(Message::broadcast("x", i.to_string()))
                .await
                .unwrap();
        }
        for churner in churners {
            churner.await.unwrap();
        }
        wait_dispatched(&broker, 1000).await;

        assert_eq!(broker.subscriber_count(), 1);
        assert_eq!(rx.len(), 1000);
        let stats = broker.stats();
        assert!(stats.delivered >= 1000);
        assert_eq!(stats.missing_recipient, 0);
    }

    #[tokio::test]
    async fn test_cancel_publishes_stopped() {
        let (broker, token, handle) = spawn_broker(BrokerConfig::default());
        wait_running(&broker).await;
        assert!(!broker.is_stopped());

        token.cancel();
        timeout(WAIT, broker.stopped()).await.unwrap();
        assert!(broker.is_stopped());
        assert_eq!(broker.state(), BrokerState::Terminated);
        assert_eq!(timeout(WAIT, handle).await.unwrap().unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_stop_leaves_parent_token_alone() {
        let (broker, token, handle) = spawn_broker(BrokerConfig::default());

        broker.stop();
        timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
        assert!(broker.is_cancelled());
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_twice() {
        let (broker, _token, _handle) = spawn_broker(BrokerConfig::default());
        wait_running(&broker).await;

        assert_eq!(broker.run().await, Err(BrokerError::AlreadyRunning));
    }

    #[tokio::test]
    async fn test_shutdown_closes_mailboxes() {
        let (broker, _token, handle) = spawn_broker(BrokerConfig::default());
        let (tx, rx) = mailbox(4);
        broker.register("alice", tx);

        timeout(WAIT, broker.shutdown()).await.unwrap();
        timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
        assert!(rx.recv().await.is_err());
        assert_eq!(broker.subscriber_count(), 0);

        // Registration after termination has no effect
        let (late_tx, late_rx) = mailbox(4);
        broker.register("late", late_tx);
        assert!(!broker.is_registered("late"));
        assert!(late_rx.is_closed());

        // Second shutdown is a no-op
        timeout(WAIT, broker.shutdown()).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_without_run() {
        let broker = Broker::new(CancellationToken::new());
        assert_eq!(broker.state(), BrokerState::Created);

        timeout(WAIT, broker.shutdown()).await.unwrap();
        assert_eq!(broker.state(), BrokerState::Terminated);
        assert_eq!(broker.run().await, Err(BrokerError::Cancelled));
    }

    #[tokio::test]
    async fn test_try_send_queue_full() {
        let broker = Broker::with_config(
            BrokerConfig {
                input_capacity: 1,
                ..BrokerConfig::default()
            },
            CancellationToken::new(),
        );

        assert_eq!(broker.try_send(Message::broadcast("a", "one")), Ok(()));
        assert_eq!(
            broker.try_send(Message::broadcast("a", "two")),
            Err(BrokerError::QueueFull)
        );
        assert_eq!(broker.stats().accepted, 1);
    }

    #[test]
    fn test_broker_mailbox_uses_config() {
        let broker = Broker::with_config(
            BrokerConfig {
                mailbox_capacity: 3,
                ..BrokerConfig::default()
            },
            CancellationToken::new(),
        );
        let (tx, _rx) = broker.mailbox();
        assert_eq!(tx.capacity(), Some(3));
    }
}
