//! # courier-store
//!
//! In-memory collaborators for the Courier broker.
//!
//! - **MessageStore** - Append-only chat history with sender filtering
//! - **UserManager** - Identity validation and uniqueness
//!
//! The broker never calls into this crate. The transport layer validates a
//! user here before registering its mailbox, and records accepted messages
//! after handing them to the broker.

pub mod history;
pub mod users;

pub use history::{MessageStore, StoreError, StoredMessage};
pub use users::{User, UserError, UserManager};
