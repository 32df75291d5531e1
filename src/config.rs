//! Typed system configuration loaded from YAML.
//!
//! One file describes the whole mesh: the agent endpoint table, security
//! settings, and delegation behavior. Every field has a serde default so a
//! minimal config stays minimal.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::breaker::CircuitBreakerConfig;
use crate::protocol::{AgentCard, AgentSkill};
use crate::registry::CapabilityRegistry;

// ---------------------------------------------------------------------------
// Agent endpoints
// ---------------------------------------------------------------------------

/// One declarative agent endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEndpointConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub description: String,
    /// Skill ids this agent advertises.
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_host() -> String { "localhost".to_string() }
fn default_version() -> String { "1.0.0".to_string() }

impl AgentEndpointConfig {
    /// Base URL for this endpoint.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Build the discovery card this config entry describes.
    pub fn to_card(&self, name: &str) -> AgentCard {
        let mut card = AgentCard::minimal(name, self.url());
        card.description = self.description.clone();
        card.version = self.version.clone();
        card.skills = self
            .capabilities
            .iter()
            .map(|id| AgentSkill::from_id(id))
            .collect();
        card
    }
}

// ---------------------------------------------------------------------------
// Security
// ---------------------------------------------------------------------------

/// Security layer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// Master switch. When off, dispatch servers accept anything.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Accept credential-less requests from loopback addresses. Explicit and
    /// off by default; enabling it is a deliberate deployment decision.
    #[serde(default)]
    pub allow_unauthenticated_loopback: bool,
    /// Access-token validity in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    /// Where the audit trail is written.
    #[serde(default = "default_audit_path")]
    pub audit_log_path: String,
    /// Records buffered before a flush.
    #[serde(default = "default_audit_batch")]
    pub audit_batch_size: usize,
}

fn default_true() -> bool { true }
fn default_token_ttl() -> u64 { crate::security::token::DEFAULT_TOKEN_TTL_SECS as u64 }
fn default_audit_path() -> String { "security_audit.log".to_string() }
fn default_audit_batch() -> usize { crate::security::audit::DEFAULT_BATCH_SIZE }

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            allow_unauthenticated_loopback: false,
            token_ttl_secs: default_token_ttl(),
            audit_log_path: default_audit_path(),
            audit_batch_size: default_audit_batch(),
        }
    }
}

// ---------------------------------------------------------------------------
// Delegation
// ---------------------------------------------------------------------------

/// Delegation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationSettings {
    /// Outbound skill-call timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Agent that receives unmatched queries.
    #[serde(default = "default_agent")]
    pub default_agent: String,
    /// Registry name of the classifier agent. `None` means keyword-only.
    #[serde(default)]
    pub classifier_agent: Option<String>,
}

fn default_request_timeout() -> u64 { crate::delegation::DEFAULT_CALL_TIMEOUT_SECS }
fn default_agent() -> String { "general".to_string() }

impl Default for DelegationSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            default_agent: default_agent(),
            classifier_agent: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

/// Whole-system configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    /// name -> endpoint.
    #[serde(default)]
    pub agents: HashMap<String, AgentEndpointConfig>,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub delegation: DelegationSettings,
    #[serde(default)]
    pub breaker: CircuitBreakerConfig,
    /// Session database file. `None` keeps sessions in memory only.
    #[serde(default)]
    pub session_db_path: Option<String>,
}

impl SystemConfig {
    /// Parse a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> Result<Self, anyhow::Error> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// URL of a configured agent.
    pub fn agent_url(&self, name: &str) -> Option<String> {
        self.agents.get(name).map(|a| a.url())
    }

    /// Register every configured agent with the registry.
    pub fn register_agents(&self, registry: &CapabilityRegistry) {
        for (name, endpoint) in &self.agents {
            registry.register(endpoint.to_card(name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
agents:
  orchestrator:
    host: localhost
    port: 10001
    description: Routes queries to worker agents
    capabilities: [delegate_task]
  menu:
    port: 10002
    capabilities: [menu, lookup]
security:
  allow_unauthenticated_loopback: true
  audit_log_path: /tmp/audit.log
delegation:
  default_agent: orchestrator
  classifier_agent: classification
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = SystemConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.agents.len(), 2);
        assert_eq!(
            config.agent_url("menu").as_deref(),
            Some("http://localhost:10002")
        );
        assert!(config.security.enabled);
        assert!(config.security.allow_unauthenticated_loopback);
        assert_eq!(config.security.token_ttl_secs, 3600);
        assert_eq!(config.delegation.request_timeout_secs, 300);
        assert_eq!(config.delegation.classifier_agent.as_deref(), Some("classification"));
        assert_eq!(config.breaker.failure_threshold, 5);
    }

    #[test]
    fn test_defaults_from_empty_config() {
        let config = SystemConfig::from_yaml("{}").unwrap();
        assert!(config.agents.is_empty());
        assert!(config.security.enabled);
        assert!(!config.security.allow_unauthenticated_loopback);
        assert_eq!(config.delegation.default_agent, "general");
        assert!(config.session_db_path.is_none());
    }

    #[test]
    fn test_register_agents_builds_cards() {
        let config = SystemConfig::from_yaml(SAMPLE).unwrap();
        let registry = CapabilityRegistry::new();
        config.register_agents(&registry);

        let entry = registry.get("menu").unwrap();
        assert_eq!(entry.card.url, "http://localhost:10002");
        assert!(entry.card.has_skill("lookup"));
        assert_eq!(registry.find_by_skill("delegate_task").len(), 1);
    }
}
