//! Collaborator traits for the vector index, accounts, and conversations.
//!
//! Each external service the chat pipeline depends on is reached only
//! through one of these traits, enabling pluggable backends (SQLite in the
//! app crate, in-memory here for tests).
//!
//! | Trait | Collaborator | Contract |
//! |-------|--------------|----------|
//! | [`Index`] | vector index | text in → ranked chunks out |
//! | [`AccountStore`] | authentication | `get_user_by_email`, `create_user` |
//! | [`ConversationStore`] | document store | point read, overwrite, compare-and-swap |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{Chunk, Conversation, UserIdentity};

/// Shortest password the account collaborators accept.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Opaque similarity index over ingested chunks.
#[async_trait]
pub trait Index: Send + Sync {
    /// Return up to `k` chunks ranked best-first. Zero matches is not an
    /// error.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<Chunk>>;
}

/// Account lookup and creation.
///
/// Passwords are handed over as-is; verifying them is the collaborator's
/// business and never happens in the core.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with [`Error::AccountNotFound`] when no account has `email`.
    async fn get_user_by_email(&self, email: &str) -> Result<UserIdentity>;

    /// Fails with [`Error::AccountExists`] when `email` is taken.
    async fn create_user(&self, email: &str, password: &str) -> Result<UserIdentity>;
}

/// Per-user conversation records keyed by uid.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persisted conversation for `uid`, or an empty one.
    async fn load(&self, uid: &str) -> Result<Conversation>;

    /// Overwrite the record with the full sequence (last writer wins).
    /// Returns the new revision.
    async fn save(&self, uid: &str, conversation: &Conversation) -> Result<u64>;

    /// Overwrite only if the stored revision still equals
    /// `conversation.revision`. Returns the new revision, or
    /// [`PersistenceError::Conflict`](crate::error::PersistenceError::Conflict).
    async fn save_checked(&self, uid: &str, conversation: &Conversation) -> Result<u64>;
}

/// Password policy shared by the account collaborators.
pub fn check_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::AccountRejected(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Canonical form of an email used as the account key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
