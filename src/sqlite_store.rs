//! SQLite-backed account and conversation collaborators.
//!
//! Stand-ins for a hosted auth service and document store, kept behind the
//! same traits ([`AccountStore`], [`ConversationStore`]). The `users` table
//! maps a normalized email to a uid; passwords are checked against the
//! length policy at creation and never stored. The `conversations` table
//! holds one row per uid with the full history as a JSON array.
//!
//! A busy or locked database is reported as
//! [`PersistenceError::Unavailable`] and retried with backoff.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use ragchat_core::error::PersistenceError;
use ragchat_core::models::{Conversation, Message, UserIdentity};
use ragchat_core::store::{check_password, normalize_email, AccountStore, ConversationStore};
use ragchat_core::{Error, Result};

use crate::retry::with_backoff;

/// Classify a driver error.
fn map_sqlx(e: sqlx::Error) -> Error {
    let kind = match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PersistenceError::Unavailable(e.to_string())
        }
        sqlx::Error::Database(db) => {
            let busy = db.code().is_some_and(|code| is_busy_code(&code));
            if busy || db.message().contains("locked") {
                PersistenceError::Unavailable(db.message().to_string())
            } else {
                PersistenceError::Storage(db.message().to_string())
            }
        }
        _ => PersistenceError::Storage(e.to_string()),
    };
    Error::Persistence(kind)
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6), including extended codes such as
/// SQLITE_BUSY_SNAPSHOT (517), whose primary code is the low byte.
fn is_busy_code(code: &str) -> bool {
    code.parse::<i32>()
        .map(|c| matches!(c & 0xff, 5 | 6))
        .unwrap_or(false)
}

fn is_transient(e: &Error) -> bool {
    matches!(e, Error::Persistence(p) if p.is_transient())
}

pub struct SqliteAccounts {
    pool: SqlitePool,
    max_retries: u32,
}

impl SqliteAccounts {
    pub fn new(pool: SqlitePool, max_retries: u32) -> Self {
        Self { pool, max_retries }
    }

    async fn find(&self, email: &str) -> Result<Option<UserIdentity>> {
        let row = sqlx::query("SELECT uid, email FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;

        Ok(row.map(|r| UserIdentity {
            uid: r.get("uid"),
            email: r.get("email"),
        }))
    }

    async fn insert(&self, email: &str) -> Result<UserIdentity> {
        let uid = uuid::Uuid::new_v4().to_string();
        let result = sqlx::query("INSERT INTO users (uid, email, created_at) VALUES (?, ?, ?)")
            .bind(&uid)
            .bind(email)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(UserIdentity {
                email: email.to_string(),
                uid,
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(Error::AccountExists {
                    email: email.to_string(),
                })
            }
            Err(e) => Err(map_sqlx(e)),
        }
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)
    }
}

#[async_trait]
impl AccountStore for SqliteAccounts {
    async fn get_user_by_email(&self, email: &str) -> Result<UserIdentity> {
        let email = normalize_email(email);
        let key = email.as_str();
        let found = with_backoff("account lookup", self.max_retries, is_transient, move || {
            self.find(key)
        })
        .await?;
        found.ok_or(Error::AccountNotFound { email })
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<UserIdentity> {
        check_password(password)?;
        let email = normalize_email(email);
        let key = email.as_str();
        let identity = with_backoff("account create", self.max_retries, is_transient, move || {
            self.insert(key)
        })
        .await?;
        debug!(uid = %identity.uid, "account created");
        Ok(identity)
    }
}

pub struct SqliteConversations {
    pool: SqlitePool,
    max_retries: u32,
}

impl SqliteConversations {
    pub fn new(pool: SqlitePool, max_retries: u32) -> Self {
        Self { pool, max_retries }
    }

    async fn read(&self, uid: &str) -> Result<Conversation> {
        let row = sqlx::query("SELECT chat_history, revision FROM conversations WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;

        let Some(row) = row else {
            return Ok(Conversation::new());
        };

        let history: String = row.get("chat_history");
        let revision: i64 = row.get("revision");
        let messages: Vec<Message> = serde_json::from_str(&history).map_err(|e| {
            PersistenceError::Corrupt {
                uid: uid.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Conversation {
            messages,
            revision: revision.max(0) as u64,
        })
    }

    async fn current_revision(&self, uid: &str) -> Result<u64> {
        let revision: Option<i64> =
            sqlx::query_scalar("SELECT revision FROM conversations WHERE uid = ?")
                .bind(uid)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(revision.unwrap_or(0).max(0) as u64)
    }

    /// Merge-upsert the history column; bumps the revision.
    async fn upsert(&self, uid: &str, history: &str) -> Result<u64> {
        let revision: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO conversations (uid, chat_history, revision, updated_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(uid) DO UPDATE SET
                chat_history = excluded.chat_history,
                revision = conversations.revision + 1,
                updated_at = excluded.updated_at
            RETURNING revision
            "#,
        )
        .bind(uid)
        .bind(history)
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(revision.max(0) as u64)
    }

    /// Write only if the stored revision equals `expected`.
    async fn compare_and_swap(&self, uid: &str, history: &str, expected: u64) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let outcome = if expected == 0 {
            sqlx::query(
                r#"
                INSERT INTO conversations (uid, chat_history, revision, updated_at)
                VALUES (?, ?, 1, ?)
                ON CONFLICT(uid) DO NOTHING
                "#,
            )
            .bind(uid)
            .bind(history)
            .bind(now)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE conversations
                SET chat_history = ?, revision = revision + 1, updated_at = ?
                WHERE uid = ? AND revision = ?
                "#,
            )
            .bind(history)
            .bind(now)
            .bind(uid)
            .bind(expected as i64)
            .execute(&self.pool)
            .await
        };
        let result = outcome.map_err(map_sqlx)?;

        if result.rows_affected() == 1 {
            return Ok(expected + 1);
        }

        let found = self.current_revision(uid).await?;
        Err(PersistenceError::Conflict {
            uid: uid.to_string(),
            expected,
            found,
        }
        .into())
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)
    }
}

fn encode(conversation: &Conversation) -> Result<String> {
    serde_json::to_string(&conversation.messages)
        .map_err(|e| PersistenceError::Storage(e.to_string()).into())
}

#[async_trait]
impl ConversationStore for SqliteConversations {
    async fn load(&self, uid: &str) -> Result<Conversation> {
        with_backoff("conversation load", self.max_retries, is_transient, move || {
            self.read(uid)
        })
        .await
    }

    async fn save(&self, uid: &str, conversation: &Conversation) -> Result<u64> {
        let history = encode(conversation)?;
        let history = history.as_str();
        with_backoff("conversation save", self.max_retries, is_transient, move || {
            self.upsert(uid, history)
        })
        .await
    }

    async fn save_checked(&self, uid: &str, conversation: &Conversation) -> Result<u64> {
        let history = encode(conversation)?;
        let history = history.as_str();
        let expected = conversation.revision;
        with_backoff("conversation save", self.max_retries, is_transient, move || {
            self.compare_and_swap(uid, history, expected)
        })
        .await
    }
}
