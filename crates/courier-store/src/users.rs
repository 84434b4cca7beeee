//! User management.
//!
//! Identities are validated and kept unique here before the transport layer
//! registers them with the broker.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// User management errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserError {
    /// Malformed id, name or email.
    #[error("Invalid user: {0}")]
    Validation(String),

    /// A user with this id already exists.
    #[error("User with ID '{0}' already exists")]
    Duplicate(String),

    /// No user with this id.
    #[error("User with ID '{0}' not found")]
    NotFound(String),

    /// The manager has been shut down.
    #[error("User manager cancelled")]
    Cancelled,
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,4}$").expect("email pattern is valid")
    })
}

/// A chat user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique identity, also the broker subscriber id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
}

impl User {
    /// Create a user.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }

    /// Check that the user is well formed.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::Validation`] for an empty id or name, or an email
    /// that does not look like `local@domain.tld`.
    pub fn validate(&self) -> Result<(), UserError> {
        if self.id.is_empty() {
            return Err(UserError::Validation("user ID cannot be empty".into()));
        }
        if self.name.is_empty() {
            return Err(UserError::Validation("user name cannot be empty".into()));
        }
        if !email_regex().is_match(&self.email) {
            return Err(UserError::Validation(format!(
                "invalid email format for user {}: {}",
                self.name, self.email
            )));
        }
        Ok(())
    }
}

/// Registry of known users.
#[derive(Debug, Default)]
pub struct UserManager {
    users: DashMap<String, User>,
    token: CancellationToken,
}

impl UserManager {
    /// Create a manager that is never cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager that refuses new users once `token` is cancelled.
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            users: DashMap::new(),
            token,
        }
    }

    /// Add a user.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::Cancelled`] after shutdown, [`UserError::Validation`]
    /// for malformed users and [`UserError::Duplicate`] if the id is taken.
    pub fn add_user(&self, user: User) -> Result<(), UserError> {
        if self.token.is_cancelled() {
            return Err(UserError::Cancelled);
        }
        user.validate()?;

        match self.users.entry(user.id.clone()) {
            Entry::Occupied(_) => Err(UserError::Duplicate(user.id)),
            Entry::Vacant(slot) => {
                debug!(user = %user.id, "User added");
                slot.insert(user);
                Ok(())
            }
        }
    }

    /// Remove a user.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::NotFound`] if the id is unknown.
    pub fn remove_user(&self, id: &str) -> Result<(), UserError> {
        match self.users.remove(id) {
            Some(_) => {
                debug!(user = %id, "User removed");
                Ok(())
            }
            None => Err(UserError::NotFound(id.to_string())),
        }
    }

    /// Get a user by id.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::NotFound`] if the id is unknown.
    pub fn get_user(&self, id: &str) -> Result<User, UserError> {
        self.users
            .get(id)
            .map(|u| u.value().clone())
            .ok_or_else(|| UserError::NotFound(id.to_string()))
    }

    /// Whether `id` is known.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.users.contains_key(id)
    }

    /// Number of users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether there are no users.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
