//! JSON-RPC error codes and error response utilities.
//!
//! Error codes follow JSON-RPC 2.0 conventions:
//! - -32700 to -32600: Standard JSON-RPC errors
//! - -32099 to -32000: Server errors (agent-specific)

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Protocol error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    // JSON-RPC 2.0 Standard Errors
    /// Invalid JSON was received by the server.
    ParseError = -32700,
    /// The JSON sent is not a valid Request object.
    InvalidRequest = -32600,
    /// The method does not exist / is not available.
    MethodNotFound = -32601,
    /// Invalid method parameter(s).
    InvalidParams = -32602,
    /// Internal server error.
    InternalError = -32603,

    // Agent-specific extensions
    /// Authentication is required.
    AuthenticationRequired = -32011,
    /// Authorization check failed.
    AuthorizationFailed = -32012,
    /// Downstream call rejected by an open circuit breaker.
    CircuitOpen = -32013,
    /// Skill execution timed out.
    SkillTimeout = -32014,
    /// The target agent was not found or is not active.
    AgentUnavailable = -32015,
}

impl ErrorCode {
    /// Get the default error message for this code.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::AuthenticationRequired => "Authentication required",
            Self::AuthorizationFailed => "Authorization failed",
            Self::CircuitOpen => "Circuit breaker open",
            Self::SkillTimeout => "Skill execution timed out",
            Self::AgentUnavailable => "Agent unavailable",
        }
    }
}

/// A JSON-RPC protocol error carried in the `error` member of a response.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// The JSON-RPC error code.
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl RpcError {
    /// Create a new `RpcError` from an error code with its default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code as i32,
            message: code.default_message().to_string(),
            data: None,
        }
    }

    /// Create a new `RpcError` with a custom message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
            data: None,
        }
    }

    /// Create with additional data.
    pub fn with_data(code: ErrorCode, message: impl Into<String>, data: Value) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Check if an error code is potentially retryable by a caller.
pub fn is_retryable_error(code: i32) -> bool {
    matches!(
        code,
        -32603 | // InternalError
        -32013 | // CircuitOpen
        -32014   // SkillTimeout
    )
}

/// Check if an error code is a client-side error (never retried).
pub fn is_client_error(code: i32) -> bool {
    matches!(
        code,
        -32700 | // ParseError
        -32600 | // InvalidRequest
        -32601 | // MethodNotFound
        -32602 | // InvalidParams
        -32011 | // AuthenticationRequired
        -32012   // AuthorizationFailed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_messages() {
        assert_eq!(ErrorCode::MethodNotFound.default_message(), "Method not found");
        assert_eq!(ErrorCode::ParseError as i32, -32700);
        assert_eq!(ErrorCode::InvalidRequest as i32, -32600);
        assert_eq!(ErrorCode::MethodNotFound as i32, -32601);
        assert_eq!(ErrorCode::InternalError as i32, -32603);
    }

    #[test]
    fn test_error_classification() {
        assert!(is_client_error(-32601));
        assert!(!is_retryable_error(-32601));
        assert!(is_retryable_error(-32603));
        assert!(is_client_error(-32012));
    }

    #[test]
    fn test_rpc_error_serializes_without_data() {
        let err = RpcError::from_code(ErrorCode::InvalidRequest);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], -32600);
        assert!(json.get("data").is_none());
    }
}
