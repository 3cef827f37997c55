//! JSON-RPC 2.0 wire envelopes
//!
//! Request and response shapes exchanged with clients. A request with a
//! missing or null `id` is a notification and produces no response.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

/// JSON-RPC 2.0 request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0"; defaulted when omitted)
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,

    /// Method name to invoke
    pub method: String,

    /// Parameters (object for all janus methods)
    #[serde(default)]
    pub params: Value,

    /// Request ID; absent or null marks a notification
    #[serde(default)]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    /// True when no response envelope is expected.
    pub fn is_notification(&self) -> bool {
        matches!(self.id, None | Some(Value::Null))
    }

    /// Check envelope invariants before dispatch proceeds.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.jsonrpc != "2.0" {
            return Err(ServerError::InvalidRequest(
                "jsonrpc must be \"2.0\"".to_string(),
            ));
        }
        if self.method.is_empty() {
            return Err(ServerError::InvalidRequest("method is empty".to_string()));
        }
        Ok(())
    }
}

/// JSON-RPC 2.0 response envelope
///
/// Exactly one of `result` / `error` is set; the constructors below are the
/// only way responses are built, so the invariant holds by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Result (present if successful)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error (present if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,

    /// Request ID (echoed from request)
    pub id: Option<Value>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Serialize to a wire string, downgrading to a minimal internal-error
    /// envelope if the response itself fails to serialize. Detail is
    /// deliberately dropped in that one case so the caller always receives
    /// some valid response.
    pub fn into_wire(self) -> String {
        let id = self.id.clone();
        serde_json::to_string(&self).unwrap_or_else(|e| {
            tracing::error!("failed to serialize response: {}", e);
            let fallback = JsonRpcResponse::error(
                id,
                JsonRpcError::internal_error("response serialization failed"),
            );
            // A response holding only a code, a static message and the echoed
            // id cannot itself fail to serialize.
            serde_json::to_string(&fallback).unwrap_or_else(|_| {
                r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"internal error"},"id":null}"#
                    .to_string()
            })
        })
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i64,

    /// Error message
    pub message: String,

    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Parse error (-32700)
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    /// Invalid request (-32600)
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    /// Method not found (-32601)
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method.into()),
            data: None,
        }
    }

    /// Invalid params (-32602)
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    /// Internal error (-32603)
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured detail to the error.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<&ServerError> for JsonRpcError {
    fn from(err: &ServerError) -> Self {
        let mut rpc = JsonRpcError {
            code: err.json_rpc_code(),
            message: err.to_string(),
            data: None,
        };
        // Tool failures keep the original message available as data so
        // clients can show it without parsing the wrapped message.
        if let ServerError::ToolExecution(detail) = err {
            rpc.data = Some(Value::String(detail.clone()));
        }
        rpc
    }
}
