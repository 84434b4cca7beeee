//! # courier-core
//!
//! Message broker core for the Courier chat engine.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Message** - A single chat event, unicast or broadcast
//! - **Mailbox** - Bounded per-subscriber delivery channel
//! - **Registry** - Subscriber identity to mailbox mapping
//! - **Broker** - Bounded input queue and the single routing loop
//! - **Stats** - Delivery and drop counters
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐            ┌─────────────┐     ┌─────────────┐
//! │  Producer   │──┐         │             │────▶│  Mailbox a  │
//! └─────────────┘  │  send   │   Broker    │     └─────────────┘
//! ┌─────────────┐  ├───────▶│ (run loop)  │     ┌─────────────┐
//! │  Producer   │──┘         │             │────▶│  Mailbox b  │
//! └─────────────┘            └─────────────┘     └─────────────┘
//!                                   │
//!                                   ▼
//!                            ┌─────────────┐
//!                            │  Registry   │
//!                            └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use courier_core::{mailbox, Broker, Message};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let broker = Broker::new(CancellationToken::new());
//! let routing = tokio::spawn({
//!     let broker = broker.clone();
//!     async move { broker.run().await }
//! });
//!
//! let (tx, rx) = mailbox(8);
//! broker.register("alice", tx);
//! broker.send(Message::direct("bob", "alice", "hi")).await.unwrap();
//!
//! let msg = rx.recv().await.unwrap();
//! assert_eq!(msg.content, "hi");
//!
//! broker.shutdown().await;
//! routing.await.unwrap().unwrap();
//! # }
//! ```

pub mod broker;
pub mod mailbox;
pub mod message;
pub mod registry;
pub mod stats;

pub use broker::{Broker, BrokerConfig, BrokerError, BrokerState};
pub use mailbox::{close_mailbox, mailbox, MailboxReceiver, MailboxSender};
pub use message::{now_nanos, Message};
pub use registry::{Dispatch, Registry};
pub use stats::{BrokerStats, StatsSnapshot};
