//! Shared fixtures for the Courier benchmarks.

use courier_core::{mailbox, Broker, BrokerConfig, MailboxReceiver, Registry};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Build a registry with `count` subscribers named `conn-{i}`.
///
/// The receivers must be kept alive or every delivery counts as closed.
#[must_use]
pub fn populated_registry(count: usize, capacity: usize) -> (Registry, Vec<MailboxReceiver>) {
    let registry = Registry::new();
    let receivers = (0..count)
        .map(|i| {
            let (tx, rx) = mailbox(capacity);
            registry.register(format!("conn-{i}"), tx);
            rx
        })
        .collect();
    (registry, receivers)
}

/// A multi-threaded runtime for async benchmarks.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
#[must_use]
pub fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
}

/// Start a broker and its routing loop on the current runtime.
pub fn spawn_broker(config: BrokerConfig) -> (Broker, JoinHandle<()>) {
    let broker = Broker::with_config(config, CancellationToken::new());
    let handle = tokio::spawn({
        let broker = broker.clone();
        async move {
            let _ = broker.run().await;
        }
    });
    (broker, handle)
}
