//! Query classification seam.
//!
//! The delegation engine asks an external oracle which agent should handle a
//! query. The oracle is a trait so the engine never depends on how the
//! decision is made; the HTTP implementation calls a classifier agent's
//! JSON-RPC endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::{RpcRequest, RpcResponse};

/// How a routing decision was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMethod {
    /// The classifier oracle answered.
    Classifier,
    /// The keyword rule table answered after the oracle failed or was absent.
    Fallback,
}

/// A routing decision for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Registry name of the agent that should handle the query.
    pub target_agent: String,
    /// Classifier's query category, e.g. "menu", "order-history".
    pub query_type: String,
    /// Confidence in [0.0, 1.0]. Advisory only; low confidence never blocks
    /// delegation.
    pub confidence: f64,
    /// Human-readable explanation of the decision.
    pub reasoning: String,
    /// How the decision was produced. Absent in classifier payloads; set by
    /// whichever path built the decision.
    #[serde(default = "default_method")]
    pub method: RoutingMethod,
}

fn default_method() -> RoutingMethod {
    RoutingMethod::Classifier
}

/// External classification oracle.
#[async_trait]
pub trait ClassifierOracle: Send + Sync {
    async fn classify(&self, query: &str) -> Result<RoutingDecision, anyhow::Error>;
}

/// Default classifier call timeout.
pub const DEFAULT_CLASSIFY_TIMEOUT_SECS: u64 = 30;

/// Oracle backed by a classifier agent's JSON-RPC endpoint.
pub struct HttpClassifier {
    /// Base URL of the classifier agent.
    url: String,
    /// Skill name to invoke.
    skill: String,
    timeout: Duration,
    /// Extra headers (the caller's security headers).
    headers: Vec<(String, String)>,
}

impl HttpClassifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            skill: "classify_query".to_string(),
            timeout: Duration::from_secs(DEFAULT_CLASSIFY_TIMEOUT_SECS),
            headers: Vec::new(),
        }
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skill = skill.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers = headers.into_iter().collect();
        self
    }
}

#[async_trait]
impl ClassifierOracle for HttpClassifier {
    async fn classify(&self, query: &str) -> Result<RoutingDecision, anyhow::Error> {
        let mut params = Map::new();
        params.insert("query".to_string(), Value::String(query.to_string()));
        let request = RpcRequest::new(
            self.skill.clone(),
            params,
            Value::String(uuid::Uuid::new_v4().to_string()),
        );

        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        let mut call = client.post(&self.url).json(&request);
        for (name, value) in &self.headers {
            call = call.header(name, value);
        }

        let response = call.send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Classifier returned HTTP {}", response.status());
        }

        let envelope: RpcResponse = response.json().await?;
        if let Some(error) = envelope.error {
            anyhow::bail!("Classifier error: {}", error);
        }
        let result = envelope
            .result
            .ok_or_else(|| anyhow::anyhow!("Classifier response missing result"))?;

        let mut decision: RoutingDecision = serde_json::from_value(result)?;
        decision.method = RoutingMethod::Classifier;
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_deserializes_from_classifier_payload() {
        let payload = serde_json::json!({
            "target_agent": "menu",
            "query_type": "menu",
            "confidence": 0.92,
            "reasoning": "Query asks about available dishes",
            "method": "classifier",
        });
        let decision: RoutingDecision = serde_json::from_value(payload).unwrap();
        assert_eq!(decision.target_agent, "menu");
        assert!(decision.confidence > 0.9);
        assert_eq!(decision.method, RoutingMethod::Classifier);
    }
}
