//! # PWAKit Common
//!
//! Pieces shared by the offline worker and its harness:
//!
//! - [`PwaKitError`], the error surfaced at crate and process boundaries
//! - [`logging`]: `tracing` subscriber setup
//! - [`retry`]: backoff and deadline helpers for network calls

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, with_timeout, RetryConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error reported across PWAKit crate boundaries.
#[derive(Error, Debug)]
pub enum PwaKitError {
    /// The network could not be reached or answered badly.
    #[error("network: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A cache write or lookup failed (including quota).
    #[error("cache storage: {0}")]
    Storage(String),

    /// Worker configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Lifecycle misuse or another bug; carries a backtrace.
    #[error("{message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl PwaKitError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Internal error with a captured backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Short tag used as a log field.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Timeout(_) => "timeout",
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Internal { .. } => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, PwaKitError>;

/// Turn a foreign error into an [`PwaKitError::InvalidArgument`] with context.
pub trait ResultExt<T> {
    fn context(self, what: impl Into<String>) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, what: impl Into<String>) -> Result<T> {
        self.map_err(|e| PwaKitError::InvalidArgument(format!("{}: {}", what.into(), e)))
    }
}

/// `None` becomes [`PwaKitError::NotFound`].
pub trait OptionExt<T> {
    fn ok_or_not_found(self, what: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, what: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| PwaKitError::NotFound(what.into()))
    }
}
