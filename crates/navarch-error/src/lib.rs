//! Error taxonomy shared across the Navarch control-plane crates.

#![forbid(unsafe_code)]

use thiserror::Error;

/// The core's error taxonomy. Variant names are the kind, not a type system
/// for its own sake — every core crate returns this type so loops and RPC
/// handlers can pattern-match on kind rather than string-sniffing messages.
#[derive(Debug, Error)]
pub enum NavarchError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("transient provider error ({provider}): {source}")]
    TransientProvider {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("permanent provider error ({provider}): {reason}")]
    PermanentProvider { provider: String, reason: String },

    #[error("store failure: {message}")]
    StoreFailure { message: String },

    #[error("fatal configuration error: {message}")]
    Fatal { message: String },
}

pub type NavarchResult<T> = Result<T, NavarchError>;

impl NavarchError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    pub fn transient_provider(provider: impl Into<String>, source: anyhow::Error) -> Self {
        Self::TransientProvider { provider: provider.into(), source }
    }

    pub fn permanent_provider(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PermanentProvider { provider: provider.into(), reason: reason.into() }
    }

    /// Whether a pool-manager loop should retry this error on its next tick
    /// rather than treating it as conclusive.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientProvider { .. } | Self::StoreFailure { .. })
    }
}
