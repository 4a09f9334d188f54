//! Error types for the authorization coordinator.

use std::io;
use thiserror::Error;

/// Result type for coordinator operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors that can occur while coordinating an authorization flow.
///
/// Failures inside the listener and orchestrator are caught at their boundary
/// and translated into an HTTP error page or a failed authorization outcome;
/// none of these variants is allowed to crash the listener task.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No free port in the configured range, or the listener failed to start.
    /// Retryable from the user's point of view.
    #[error("callback listener unavailable: {reason}")]
    ListenerUnavailable { reason: String },

    /// Provider client configuration absent or invalid. Requires operator
    /// intervention.
    #[error("provider client configuration missing or invalid: {reason}")]
    MissingClientConfig { reason: String },

    /// Callback carried a state token with no live session. Covers unknown,
    /// expired and already-consumed tokens alike.
    #[error("unknown or expired authorization session")]
    UnknownOrExpiredSession,

    /// The provider redirected back with an explicit `error` parameter.
    #[error("authorization denied by provider: {error}")]
    ProviderDenied {
        error: String,
        description: Option<String>,
    },

    /// The code-for-token exchange was rejected.
    #[error("token exchange failed: {reason}")]
    ExchangeFailed { reason: String },

    /// A persisted credential record could not be parsed. Callers treat the
    /// user as unauthorized; re-authorizing overwrites the record.
    #[error("stored credential record is corrupt: {reason}")]
    CorruptRecord { reason: String },

    /// An expired credential could not be refreshed.
    #[error("token refresh failed: {reason}")]
    RefreshFailed { reason: String },

    /// Transport-level failure talking to the provider.
    #[error("network error: {reason}")]
    Network { reason: String },

    /// Filesystem failure in the credential store.
    #[error("storage error: {0}")]
    Io(#[from] io::Error),

    /// Unexpected internal state.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl AuthError {
    /// Creates a listener unavailable error.
    pub fn listener_unavailable(reason: impl Into<String>) -> Self {
        Self::ListenerUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a missing client configuration error.
    pub fn missing_client_config(reason: impl Into<String>) -> Self {
        Self::MissingClientConfig {
            reason: reason.into(),
        }
    }

    /// Creates a provider denial error from the callback query parameters.
    pub fn provider_denied(error: impl Into<String>, description: Option<String>) -> Self {
        Self::ProviderDenied {
            error: error.into(),
            description,
        }
    }

    /// Creates a token exchange error.
    pub fn exchange_failed(reason: impl Into<String>) -> Self {
        Self::ExchangeFailed {
            reason: reason.into(),
        }
    }

    /// Creates a corrupt record error.
    pub fn corrupt_record(reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            reason: reason.into(),
        }
    }

    /// Creates a refresh failure error.
    pub fn refresh_failed(reason: impl Into<String>) -> Self {
        Self::RefreshFailed {
            reason: reason.into(),
        }
    }

    /// Creates a network error.
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// The short, user-facing description of this failure, suitable for the
    /// callback error page and chat messages.
    pub fn user_message(&self) -> String {
        match self {
            Self::ProviderDenied { error, description } => match description {
                Some(description) => format!("authorization denied: {error} ({description})"),
                None => format!("authorization denied: {error}"),
            },
            other => other.to_string(),
        }
    }
}
