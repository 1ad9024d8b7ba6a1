//! Session and auth gate.
//!
//! A [`Session`] is the explicit per-client state object: it is either
//! signed out, or signed in with a user identity and that user's
//! in-memory conversation. The chat pipeline only accepts a signed-in
//! session.
//!
//! ```text
//!            sign_up / sign_in
//! SignedOut ─────────────────────▶ SignedIn { user, conversation }
//!     ▲                                        │
//!     └──────────────── sign_out ──────────────┘
//! ```
//!
//! Passwords are forwarded to the [`AccountStore`] and never checked here.

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{Conversation, UserIdentity};
use crate::store::{AccountStore, ConversationStore};

/// A signed-in user and their conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveUser {
    pub identity: UserIdentity,
    pub conversation: Conversation,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SessionState {
    #[default]
    SignedOut,
    SignedIn(ActiveUser),
}

/// Per-client session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    state: SessionState,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self.state, SessionState::SignedIn(_))
    }

    pub fn user(&self) -> Option<&UserIdentity> {
        match &self.state {
            SessionState::SignedIn(active) => Some(&active.identity),
            SessionState::SignedOut => None,
        }
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        match &self.state {
            SessionState::SignedIn(active) => Some(&active.conversation),
            SessionState::SignedOut => None,
        }
    }

    /// The signed-in user, or [`Error::NotSignedIn`].
    pub fn active_mut(&mut self) -> Result<&mut ActiveUser> {
        match &mut self.state {
            SessionState::SignedIn(active) => Ok(active),
            SessionState::SignedOut => Err(Error::NotSignedIn),
        }
    }

    /// Create an account and sign in with an empty conversation.
    pub async fn sign_up(
        &mut self,
        accounts: &dyn AccountStore,
        conversations: &dyn ConversationStore,
        email: &str,
        password: &str,
    ) -> Result<&UserIdentity> {
        self.ensure_signed_out()?;
        let email = require_credentials(email, password)?;

        let identity = accounts.create_user(email, password).await?;
        let mut conversation = Conversation::new();
        match conversations.save(&identity.uid, &conversation).await {
            Ok(revision) => conversation.revision = revision,
            // Loading an absent record yields the same empty conversation.
            Err(e) => warn!(uid = %identity.uid, error = %e, "could not create conversation record"),
        }

        info!(uid = %identity.uid, "signed up");
        Ok(self.enter(identity, conversation))
    }

    /// Look up an existing account and load its conversation.
    ///
    /// On failure the session stays signed out.
    pub async fn sign_in(
        &mut self,
        accounts: &dyn AccountStore,
        conversations: &dyn ConversationStore,
        email: &str,
        password: &str,
    ) -> Result<&UserIdentity> {
        self.ensure_signed_out()?;
        let email = require_credentials(email, password)?;

        let identity = accounts.get_user_by_email(email).await?;
        let conversation = conversations.load(&identity.uid).await?;

        info!(uid = %identity.uid, messages = conversation.len(), "signed in");
        Ok(self.enter(identity, conversation))
    }

    /// Drop the in-memory conversation and return to signed out.
    pub fn sign_out(&mut self) {
        if let Some(user) = self.user() {
            info!(uid = %user.uid, "signed out");
        }
        self.state = SessionState::SignedOut;
    }

    fn ensure_signed_out(&self) -> Result<()> {
        match &self.state {
            SessionState::SignedIn(active) => Err(Error::AlreadySignedIn {
                email: active.identity.email.clone(),
            }),
            SessionState::SignedOut => Ok(()),
        }
    }

    fn enter(&mut self, identity: UserIdentity, conversation: Conversation) -> &UserIdentity {
        self.state = SessionState::SignedIn(ActiveUser {
            identity,
            conversation,
        });
        match &self.state {
            SessionState::SignedIn(active) => &active.identity,
            SessionState::SignedOut => unreachable!("state was just set to SignedIn"),
        }
    }
}

fn require_credentials<'a>(email: &'a str, password: &str) -> Result<&'a str> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(Error::MissingCredentials);
    }
    Ok(email)
}
