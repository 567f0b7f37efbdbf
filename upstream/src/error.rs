use chrono::{
    DateTime,
    Utc,
};

/// Whole-call failure, classified for the scheduler's retry policy.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network trouble, 5xx, or rate limiting: worth retrying with backoff.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// The daily quota allocation is spent. Retryable only once `resets_at`
    /// has passed; the scheduler suspends all polling until then.
    #[error("upstream quota exhausted until {resets_at}")]
    QuotaExhausted { resets_at: DateTime<Utc> },

    /// The upstream rejected the call outright (bad credentials, forbidden
    /// endpoint). Terminal for the task; never retried.
    #[error("upstream denied the request: {0}")]
    Denied(String),
}

/// Per-entity failure inside an otherwise successful call.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityError {
    /// The entity is gone upstream (deleted, or never existed).
    #[error("not found upstream")]
    NotFound,

    /// The entity exists but its data is withheld (private video, hidden
    /// statistics).
    #[error("access to the entity was denied upstream")]
    PermissionDenied,
}

pub type FetchResult<T> = Result<T, FetchError>;
pub type EntityResult<T> = Result<T, EntityError>;
