use thiserror::Error;

use crate::retry::Retryable;

/// Configuration could not be loaded or is internally inconsistent.
///
/// Both variants are fatal at startup: the process must not run on a
/// configuration it could not validate.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure of a market data source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure, timeout, rate limiting or a 5xx from the provider.
    #[error("transient failure from {source_name}: {message}")]
    Transient {
        source_name: &'static str,
        message: String,
    },

    /// The provider answered but had nothing for us yet.
    #[error("{source_name} returned an empty result")]
    Empty { source_name: &'static str },

    /// Response did not match the expected schema.
    #[error("malformed response from {source_name}: {message}")]
    Malformed {
        source_name: &'static str,
        message: String,
    },

    /// The provider refused the request (4xx other than 429).
    #[error("{source_name} rejected request with status {status}")]
    Rejected {
        source_name: &'static str,
        status: u16,
    },
}

impl Retryable for FetchError {
    fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. } | FetchError::Empty { .. })
    }
}

/// Persistence backend failure. The engine degrades to in-memory state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Notification was not confirmed by the transport.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery transport error: {0}")]
    Transport(String),

    #[error("delivery rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl Retryable for NotifyError {
    fn is_transient(&self) -> bool {
        match self {
            NotifyError::Transport(_) => true,
            NotifyError::Rejected { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Snapshot provider backend failure (distinct from "no data yet").
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("snapshot buffer lock poisoned")]
    Poisoned,

    #[error("snapshot backend error: {0}")]
    Backend(String),
}

/// A monitor cycle that could not complete.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("snapshot provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("status lock poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_classification() {
        let transient = FetchError::Transient {
            source_name: "underlying",
            message: "timeout".to_string(),
        };
        let empty = FetchError::Empty {
            source_name: "option_chain",
        };
        let malformed = FetchError::Malformed {
            source_name: "underlying",
            message: "missing field `rsi`".to_string(),
        };
        let rejected = FetchError::Rejected {
            source_name: "underlying",
            status: 404,
        };

        assert!(transient.is_transient());
        assert!(empty.is_transient());
        assert!(!malformed.is_transient());
        assert!(!rejected.is_transient());
    }

    #[test]
    fn test_notify_error_classification() {
        assert!(NotifyError::Transport("connection reset".into()).is_transient());
        assert!(NotifyError::Rejected {
            status: 429,
            body: String::new()
        }
        .is_transient());
        assert!(NotifyError::Rejected {
            status: 502,
            body: String::new()
        }
        .is_transient());
        assert!(!NotifyError::Rejected {
            status: 400,
            body: "chat not found".into()
        }
        .is_transient());
    }
}
