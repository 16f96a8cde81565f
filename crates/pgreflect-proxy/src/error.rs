//! Error types for the proxy crate.

use pgreflect_core::CredentialStoreError;
use thiserror::Error;

/// Errors that can occur in the reflection proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The tenant named by the client has no provisioned credentials.
    #[error("tenant not provisioned: {0}")]
    TenantNotProvisioned(String),

    /// A peer sent bytes that do not form a valid frame, or a frame that is
    /// not acceptable at this point of the conversation.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The backend could not be reached or refused the requested TLS mode.
    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    /// The session sent more queries than its window allows.
    #[error("rate limit exceeded: {count} queries in {window_ms}ms (limit {limit})")]
    RateLimitExceeded {
        count: usize,
        limit: usize,
        window_ms: u64,
    },

    /// The credential store failed to answer.
    #[error(transparent)]
    CredentialStore(#[from] CredentialStoreError),

    /// Failed to bind to the listen address.
    #[error("failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        source: std::io::Error,
    },

    /// Every port of the configured range is taken.
    #[error("no port available in {first}..={last}")]
    NoPortAvailable { first: u16, last: u16 },

    /// Socket error on either leg.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Whether the client should be told to go away with a bare Terminate
    /// frame rather than an error message.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            ProxyError::TenantNotProvisioned(_)
                | ProxyError::BackendUnreachable(_)
                | ProxyError::CredentialStore(_)
        )
    }
}
