//! Outbound JSON-RPC client for agent-to-agent calls.
//!
//! Each call builds a fresh `reqwest::Client` with the call's timeout, posts
//! the envelope with the caller's security headers attached, and unwraps the
//! response. An `error` member in an otherwise-successful HTTP response is a
//! call failure.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::{RpcError, RpcRequest, RpcResponse};
use crate::security::SecurityManager;

/// Default skill-call timeout, matching long-running delegated work.
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 300;

/// Outbound call failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport error calling {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Agent at {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Agent returned error: {0}")]
    Rpc(RpcError),
    #[error("Agent response carried neither result nor error")]
    MissingResult,
}

impl ClientError {
    /// Whether the failure was the client-side timeout firing.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_timeout())
    }
}

/// JSON-RPC client bound to one caller identity.
#[derive(Clone)]
pub struct AgentClient {
    /// Identity whose API key is attached to outbound calls.
    identity: String,
    security: Option<Arc<SecurityManager>>,
    timeout: Duration,
}

impl AgentClient {
    pub fn new(identity: impl Into<String>, security: Option<Arc<SecurityManager>>) -> Self {
        Self {
            identity: identity.into(),
            security,
            timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Headers attached to every outbound call.
    pub fn headers(&self) -> Vec<(String, String)> {
        match &self.security {
            Some(security) => security.secure_headers(&self.identity).into_iter().collect(),
            None => vec![("Content-Type".to_string(), "application/json".to_string())],
        }
    }

    /// Invoke `skill` on the agent at `url` and return its result value.
    pub async fn call_skill(
        &self,
        url: &str,
        skill: &str,
        params: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        let request = RpcRequest::new(skill, params, Value::String(Uuid::new_v4().to_string()));

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|source| ClientError::Transport {
                url: url.to_string(),
                source,
            })?;

        let mut call = client.post(url).json(&request);
        for (name, value) in self.headers() {
            call = call.header(name, value);
        }

        log::debug!("Calling skill '{}' on {}", skill, url);
        let response = call.send().await.map_err(|source| ClientError::Transport {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            // Auth rejections arrive as 401/403 with a JSON-RPC error body;
            // surface that error when present.
            if let Ok(envelope) = response.json::<RpcResponse>().await {
                if let Some(error) = envelope.error {
                    return Err(ClientError::Rpc(error));
                }
            }
            return Err(ClientError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let envelope: RpcResponse =
            response
                .json()
                .await
                .map_err(|source| ClientError::Transport {
                    url: url.to_string(),
                    source,
                })?;

        if let Some(error) = envelope.error {
            return Err(ClientError::Rpc(error));
        }
        envelope.result.ok_or(ClientError::MissingResult)
    }
}
