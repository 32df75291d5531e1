//! The JSON-RPC request/response envelope exchanged between agents.
//!
//! Every inter-agent call is a single POST carrying an [`RpcRequest`]; the
//! reply is an [`RpcResponse`] holding either `result` or `error`, never both.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::{ErrorCode, RpcError};

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Protocol marker, always "2.0".
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    /// Name of the skill to invoke. Absent or empty is an invalid request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Flat parameter map passed to the skill.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Correlation id echoed back in the response.
    #[serde(default)]
    pub id: Value,
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

impl RpcRequest {
    /// Build a request for `method` with the given parameters and id.
    pub fn new(method: impl Into<String>, params: Map<String, Value>, id: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            method: Some(method.into()),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Protocol marker, always "2.0".
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    /// Skill return value on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object on any handled failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Correlation id from the request.
    pub id: Value,
}

impl RpcResponse {
    /// Build a success response.
    pub fn success(result: Value, id: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Build an error response from an [`RpcError`].
    pub fn error(error: RpcError, id: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Build an error response from a bare code with a custom message.
    pub fn error_code(code: ErrorCode, message: impl Into<String>, id: Value) -> Self {
        Self::error(RpcError::new(code, message), id)
    }

    /// Whether this response carries a result.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let mut params = Map::new();
        params.insert("id".to_string(), Value::String("7".to_string()));
        let req = RpcRequest::new("lookup", params, Value::String("req-1".to_string()));

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["method"], "lookup");
        assert_eq!(json["params"]["id"], "7");

        let back: RpcRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back.method.as_deref(), Some("lookup"));
    }

    #[test]
    fn test_missing_method_parses_as_none() {
        let req: RpcRequest =
            serde_json::from_value(serde_json::json!({"params": {}, "id": 1})).unwrap();
        assert!(req.method.is_none());
    }

    #[test]
    fn test_response_never_carries_both_members() {
        let ok = RpcResponse::success(Value::Bool(true), Value::from(3));
        assert!(ok.is_success());
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("error").is_none());

        let err = RpcResponse::error_code(ErrorCode::MethodNotFound, "nope", Value::from(3));
        assert!(!err.is_success());
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["code"], -32601);
    }
}
