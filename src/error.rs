//! Error types for the Digi-Key credential lifecycle

use crate::auth::StoreError;
use thiserror::Error;

/// Main error type for credential lifecycle operations
#[derive(Error, Debug)]
pub enum AuthError {
    /// TLS key or certificate for the callback listener could not be produced
    #[error("TLS provisioning failed for {path}: {message}")]
    TlsProvisioning {
        /// File that could not be generated or written
        path: String,
        /// Underlying failure
        message: String,
    },

    /// No authorization callback arrived in time
    #[error(
        "No authorization callback received within {timeout_secs} seconds\nSuggestion: Re-run and complete the sign-in in the browser window"
    )]
    CallbackTimeout {
        /// Timeout that elapsed
        timeout_secs: u64,
    },

    /// The provider redirected back without an authorization code
    #[error("Authorization denied: {}", reason.as_deref().unwrap_or("no code in callback"))]
    AuthorizationDenied {
        /// Provider supplied reason, if any
        reason: Option<String>,
    },

    /// Callback carried a `state` value that does not belong to this session
    #[error("Callback state mismatch: expected {expected}, received {received}")]
    StateMismatch {
        /// State sent with the authorization request
        expected: String,
        /// State returned by the browser redirect
        received: String,
    },

    /// Token endpoint answered with a non-success status
    #[error("Token endpoint returned HTTP {status}: {body}")]
    Provider {
        /// HTTP status code
        status: u16,
        /// Response body text
        body: String,
    },

    /// Token endpoint answered 200 but the payload is unusable
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Transport level HTTP failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Callback listener could not be started
    #[error("Callback listener error: {0}")]
    Listener(String),

    /// A callback session is already active on this listener
    #[error("Callback listener is already waiting for an authorization code")]
    ListenerBusy,

    /// Browser could not be opened
    #[error("Could not open browser: {0}")]
    Browser(String),

    /// Credential file error
    #[error("Credential storage error: {0}")]
    Storage(#[from] StoreError),

    /// Client id or secret not configured
    #[error(
        "Missing client credentials: set DK_CLIENT_ID and DK_CLIENT_SECRET in the environment or credential file"
    )]
    MissingClientCredentials,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for credential lifecycle operations
pub type Result<T> = std::result::Result<T, AuthError>;

impl AuthError {
    /// Create a TLS provisioning error
    pub fn tls(path: impl AsRef<std::path::Path>, msg: impl std::fmt::Display) -> Self {
        Self::TlsProvisioning {
            path: path.as_ref().display().to_string(),
            message: msg.to_string(),
        }
    }

    /// Create a callback timeout error
    #[must_use]
    pub fn callback_timeout(timeout: std::time::Duration) -> Self {
        Self::CallbackTimeout {
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Create an authorization denied error
    #[must_use]
    pub fn denied(reason: Option<String>) -> Self {
        Self::AuthorizationDenied { reason }
    }

    /// Create a provider error
    pub fn provider(status: u16, body: impl Into<String>) -> Self {
        Self::Provider {
            status,
            body: body.into(),
        }
    }

    /// Create an invalid response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Create a listener error
    pub fn listener(msg: impl Into<String>) -> Self {
        Self::Listener(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether invoking the same operation again may succeed without user action.
    ///
    /// Timeouts, transport failures, rate limiting and 5xx responses are
    /// transient. Denials, state mismatches and 4xx responses (bad client
    /// credentials, revoked grants) are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CallbackTimeout { .. } | Self::Http(_) => true,
            Self::Provider { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
