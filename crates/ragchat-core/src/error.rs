//! Error taxonomy for the chat pipeline.
//!
//! Every collaborator failure is mapped onto one of these kinds so the UI
//! boundary can decide what to show without string matching.

use thiserror::Error;

/// The top-level error type for all RAG Chat core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The ingestion source directory is missing or holds no usable text.
    #[error("no input documents: {0}")]
    NoInput(String),

    /// The query is empty or otherwise unusable.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("account already exists: {email}")]
    AccountExists { email: String },

    #[error("account not found: {email}")]
    AccountNotFound { email: String },

    #[error("email and password must both be provided")]
    MissingCredentials,

    /// Rejected by the account collaborator (e.g. password too short).
    #[error("account rejected: {0}")]
    AccountRejected(String),

    #[error("already signed in as {email}")]
    AlreadySignedIn { email: String },

    #[error("not signed in")]
    NotSignedIn,

    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by the completion collaborator.
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    #[error("API request failed (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited by provider")]
    RateLimited,

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("completion provider is disabled")]
    Disabled,
}

impl CompletionError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            CompletionError::RateLimited
            | CompletionError::Timeout(_)
            | CompletionError::Network(_) => true,
            CompletionError::Api { status, .. } => *status >= 500,
            CompletionError::Malformed(_) | CompletionError::Disabled => false,
        }
    }
}

/// Failures reported by the persistence collaborator.
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    /// The backing store could not be reached or is locked.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("corrupt record for {uid}: {reason}")]
    Corrupt { uid: String, reason: String },

    /// Another writer saved the record since it was loaded.
    #[error("revision conflict for {uid}: expected {expected}, found {found}")]
    Conflict {
        uid: String,
        expected: u64,
        found: u64,
    },
}

impl PersistenceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PersistenceError::Unavailable(_))
    }
}

impl Error {
    /// Machine-readable code used by the HTTP boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NoInput(_) => "no_input",
            Error::InvalidQuery(_) => "invalid_query",
            Error::AccountExists { .. } => "account_exists",
            Error::AccountNotFound { .. } => "account_not_found",
            Error::MissingCredentials => "missing_credentials",
            Error::AccountRejected(_) => "account_rejected",
            Error::AlreadySignedIn { .. } => "already_signed_in",
            Error::NotSignedIn => "not_signed_in",
            Error::Completion(CompletionError::Timeout(_)) => "timeout",
            Error::Completion(_) => "completion_failure",
            Error::Embedding(_) => "embedding_failure",
            Error::Persistence(PersistenceError::Conflict { .. }) => "conflict",
            Error::Persistence(_) => "persistence_failure",
            Error::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_error_displays_status() {
        let err = Error::from(CompletionError::Api {
            status: 503,
            message: "overloaded".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("overloaded"));
        assert_eq!(err.code(), "completion_failure");
    }

    #[test]
    fn transient_classification() {
        assert!(CompletionError::RateLimited.is_transient());
        assert!(CompletionError::Api {
            status: 502,
            message: String::new()
        }
        .is_transient());
        assert!(!CompletionError::Api {
            status: 400,
            message: String::new()
        }
        .is_transient());
        assert!(PersistenceError::Unavailable("locked".into()).is_transient());
        assert!(!PersistenceError::Conflict {
            uid: "u".into(),
            expected: 1,
            found: 2
        }
        .is_transient());
    }

    #[test]
    fn conflict_has_its_own_code() {
        let err = Error::from(PersistenceError::Conflict {
            uid: "u1".into(),
            expected: 3,
            found: 4,
        });
        assert_eq!(err.code(), "conflict");
    }
}
