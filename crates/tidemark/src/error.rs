//! Error types for the tidemark crate.

use thiserror::Error;

/// Errors that can occur in the metrics engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration is unusable (e.g. no driver).
    #[error("configuration error: {reason}")]
    Config {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// An input failed validation (granularity, instant, payload).
    #[error("validation error: {reason}")]
    Validation {
        /// Why the input was rejected.
        reason: String,
    },

    /// A write was enqueued after the buffer shut down.
    #[error("buffer is closed")]
    BufferClosed,

    /// The storage backend reported a failure.
    #[error("backend error: {source}")]
    Backend {
        /// The underlying client error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Wraps a backend client error.
    pub fn backend(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend {
            source: Box::new(source),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for Error {
    fn from(source: tokio_postgres::Error) -> Self {
        Self::backend(source)
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(source: redis::RedisError) -> Self {
        Self::backend(source)
    }
}

#[cfg(feature = "mongo")]
impl From<mongodb::error::Error> for Error {
    fn from(source: mongodb::error::Error) -> Self {
        Self::backend(source)
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
