//! In-memory collaborator implementations for tests and embedding.
//!
//! Stores keep a `HashMap` behind `std::sync::RwLock`. The index is a fixed
//! `Vec` of chunks ranked by how many distinct query terms they contain;
//! there is no embedding model involved.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, PersistenceError, Result};
use crate::models::{Chunk, Conversation, UserIdentity};

use super::{check_password, normalize_email, AccountStore, ConversationStore, Index};

fn poisoned() -> Error {
    Error::Persistence(PersistenceError::Storage("lock poisoned".to_string()))
}

/// Term-overlap index over a fixed set of chunks.
#[derive(Default)]
pub struct InMemoryIndex {
    chunks: Vec<Chunk>,
}

impl InMemoryIndex {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }
}

#[async_trait]
impl Index for InMemoryIndex {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<Chunk>> {
        let query_lower = text.to_lowercase();
        let mut terms: Vec<&str> = query_lower
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| !t.is_empty())
            .collect();
        terms.sort_unstable();
        terms.dedup();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, &Chunk)> = self
            .chunks
            .iter()
            .filter_map(|c| {
                let lower = c.text.to_lowercase();
                let hits = terms.iter().filter(|t| lower.contains(*t)).count();
                (hits > 0).then_some((hits, c))
            })
            .collect();
        // Stable sort keeps insertion order among ties.
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored.into_iter().take(k).map(|(_, c)| c.clone()).collect())
    }
}

/// Account directory keyed by normalized email.
#[derive(Default)]
pub struct InMemoryAccounts {
    users: RwLock<HashMap<String, UserIdentity>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccounts {
    async fn get_user_by_email(&self, email: &str) -> Result<UserIdentity> {
        let key = normalize_email(email);
        let users = self.users.read().map_err(|_| poisoned())?;
        users
            .get(&key)
            .cloned()
            .ok_or(Error::AccountNotFound { email: key })
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<UserIdentity> {
        check_password(password)?;
        let key = normalize_email(email);
        let mut users = self.users.write().map_err(|_| poisoned())?;
        if users.contains_key(&key) {
            return Err(Error::AccountExists { email: key });
        }
        let identity = UserIdentity {
            email: key.clone(),
            uid: Uuid::new_v4().to_string(),
        };
        users.insert(key, identity.clone());
        Ok(identity)
    }
}

/// Conversation records keyed by uid.
#[derive(Default)]
pub struct InMemoryConversations {
    records: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversations {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self, uid: &str, conversation: &Conversation, expected: Option<u64>) -> Result<u64> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let found = records.get(uid).map(|c| c.revision).unwrap_or(0);
        if let Some(expected) = expected {
            if found != expected {
                return Err(PersistenceError::Conflict {
                    uid: uid.to_string(),
                    expected,
                    found,
                }
                .into());
            }
        }
        let revision = found + 1;
        records.insert(
            uid.to_string(),
            Conversation {
                messages: conversation.messages.clone(),
                revision,
            },
        );
        Ok(revision)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversations {
    async fn load(&self, uid: &str) -> Result<Conversation> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(uid).cloned().unwrap_or_default())
    }

    async fn save(&self, uid: &str, conversation: &Conversation) -> Result<u64> {
        self.write(uid, conversation, None)
    }

    async fn save_checked(&self, uid: &str, conversation: &Conversation) -> Result<u64> {
        self.write(uid, conversation, Some(conversation.revision))
    }
}
