//! Error types and handling for the client-core library
//!
//! Request operations on [`Client`](crate::Client) report acceptance as a plain
//! `bool` and deliver outcomes through the listener. `ClientError` is what flows
//! underneath: it is returned by construction, credential validation and
//! process teardown, carried by collaborator results, and rendered into the
//! `reason` strings of failure events.
//!
//! # Error Categories
//!
//! - **Validation Errors** - Bad or missing credentials and options, rejected before any state change
//! - **State Errors** - Operation invalid in the current session state or role
//! - **Signaling Errors** - Handshake, negotiation and command failures reported by the transport
//! - **Transport Errors** - Mid-session network loss
//! - **Lifecycle Errors** - Cancellation, timeouts and process teardown
//!
//! # Recovery
//!
//! The reconnect loop only retries errors for which [`ClientError::is_recoverable`]
//! returns true:
//!
//! ```rust
//! use rtstream_client_core::ClientError;
//!
//! let unauthorized = ClientError::connection_failed(401, "Unauthorized");
//! let unavailable = ClientError::connection_failed(503, "Service Unavailable");
//!
//! assert!(!unauthorized.is_recoverable());
//! assert!(unavailable.is_recoverable());
//! assert_eq!(unavailable.category(), "signaling");
//! ```

use thiserror::Error;

use crate::client::types::{ClientRole, SessionState};

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Invalid credentials: {field} - {reason}")]
    InvalidCredentials { field: String, reason: String },

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Operation {operation} not allowed in state {state}")]
    InvalidState { operation: String, state: SessionState },

    #[error("Operation {operation} requires a {required} client")]
    RoleMismatch { operation: String, required: ClientRole },

    #[error("Connection failed ({status}): {reason}")]
    ConnectionFailed { status: i32, reason: String },

    #[error("Negotiation failed: {reason}")]
    NegotiationFailed { reason: String },

    #[error("Signaling error: {reason}")]
    SignalingError { reason: String },

    #[error("Transport dropped: {reason}")]
    TransportDropped { reason: String },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Operation timeout after {duration_ms}ms")]
    OperationTimeout { duration_ms: u64 },

    #[error("{live_clients} client(s) still alive")]
    ResourceBusy { live_clients: usize },

    #[error("Process resources have been torn down")]
    ProcessTornDown,

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl ClientError {
    /// Create an invalid credentials error
    pub fn invalid_credentials(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCredentials { field: field.into(), reason: reason.into() }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration { field: field.into(), reason: reason.into() }
    }

    pub fn invalid_state(operation: impl Into<String>, state: SessionState) -> Self {
        Self::InvalidState { operation: operation.into(), state }
    }

    pub fn role_mismatch(operation: impl Into<String>, required: ClientRole) -> Self {
        Self::RoleMismatch { operation: operation.into(), required }
    }

    /// Create a connection failure carrying the server status
    pub fn connection_failed(status: i32, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed { status, reason: reason.into() }
    }

    pub fn negotiation_failed(reason: impl Into<String>) -> Self {
        Self::NegotiationFailed { reason: reason.into() }
    }

    pub fn signaling_error(reason: impl Into<String>) -> Self {
        Self::SignalingError { reason: reason.into() }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled { operation: operation.into() }
    }

    /// Create an internal error
    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self::InternalError { message: reason.into() }
    }

    /// Status code and reason as reported through `on_connection_error`.
    ///
    /// Errors that did not come from a handshake map to status 0.
    pub fn status_and_reason(&self) -> (i32, String) {
        match self {
            ClientError::ConnectionFailed { status, reason } => (*status, reason.clone()),
            other => (0, other.to_string()),
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Status 0 means the request never reached the server
            ClientError::ConnectionFailed { status, .. } => {
                *status == 0 || *status == 408 || *status == 429 || *status >= 500
            }
            ClientError::TransportDropped { .. } |
            ClientError::SignalingError { .. } |
            ClientError::OperationTimeout { .. } => true,

            ClientError::InvalidCredentials { .. } |
            ClientError::InvalidConfiguration { .. } |
            ClientError::InvalidState { .. } |
            ClientError::RoleMismatch { .. } |
            ClientError::Cancelled { .. } |
            ClientError::ResourceBusy { .. } |
            ClientError::ProcessTornDown => false,

            _ => false,
        }
    }

    /// Check if error indicates an authentication issue
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionFailed { status: 401 | 403, .. }
                | ClientError::InvalidCredentials { .. }
        )
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::InvalidCredentials { .. } |
            ClientError::InvalidConfiguration { .. } => "validation",

            ClientError::InvalidState { .. } |
            ClientError::RoleMismatch { .. } => "state",

            ClientError::ConnectionFailed { .. } |
            ClientError::NegotiationFailed { .. } |
            ClientError::SignalingError { .. } => "signaling",

            ClientError::TransportDropped { .. } => "transport",

            ClientError::Cancelled { .. } |
            ClientError::OperationTimeout { .. } |
            ClientError::ResourceBusy { .. } |
            ClientError::ProcessTornDown |
            ClientError::InternalError { .. } => "system",
        }
    }
}
