//! Error types for the janus server core
//!
//! This module provides structured error handling using thiserror, plus the
//! mapping from internal errors to the stable JSON-RPC error codes callers
//! see on the wire.

use thiserror::Error;

/// Main error type for janus operations
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed request envelope
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Method name not routable
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Parameters missing or of the wrong shape
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Caller has not consented to the required tier
    #[error("Consent verification failed: {0}")]
    ConsentDenied(String),

    /// Caller's role does not permit the operation
    #[error("Authorization failed: {0}")]
    AuthorizationDenied(String),

    /// Resource path does not exist in the backing store
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Malformed or out-of-bounds byte range expression
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Stream id is not tracked (closed, completed, or never created)
    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    /// Unsubscribe for a callback id that was never subscribed
    #[error("Not subscribed: {callback_id} has no subscription for {uri}")]
    NotSubscribed { uri: String, callback_id: String },

    /// Resource identifier does not match `resource://<provider>/<path>`
    #[error("Invalid resource URI: {0}")]
    InvalidUri(String),

    /// Tool raised during execution; original message preserved
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for janus operations
pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
    /// Stable JSON-RPC error code for this error.
    ///
    /// Protocol and resource errors map onto the reserved -326xx range;
    /// consent and authorization denials use the server-defined -32000 and
    /// -32002 so clients can tell them apart.
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            ServerError::InvalidRequest(_) => -32600,
            ServerError::MethodNotFound(_) => -32601,
            ServerError::InvalidParams(_)
            | ServerError::ResourceNotFound(_)
            | ServerError::InvalidRange(_)
            | ServerError::UnknownStream(_)
            | ServerError::NotSubscribed { .. }
            | ServerError::InvalidUri(_) => -32602,
            ServerError::ConsentDenied(_) => -32000,
            ServerError::AuthorizationDenied(_) => -32002,
            ServerError::ToolExecution(_)
            | ServerError::Config(_)
            | ServerError::Io(_)
            | ServerError::Serialization(_)
            | ServerError::Internal(_) => -32603,
        }
    }
}

/// Convert anyhow::Error to ServerError
impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}
