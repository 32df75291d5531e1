//! Capability registry: the single source of truth for which agents exist,
//! where they live, and what they can do.
//!
//! Health state is advisory only. Entries are never removed during the
//! process lifetime; failed probes only mark them unhealthy or unreachable,
//! since agents may recover and the registry reflects last-known state, not
//! guaranteed liveness.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::AgentCard;

/// Liveness status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Last probe (or registration) succeeded.
    Active,
    /// The agent answered with an HTTP-level failure.
    Unhealthy,
    /// The agent could not be reached at all.
    Unreachable,
}

/// One registry entry. The card is read-only after registration; only the
/// status and health-check timestamp mutate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// The agent's discovery card.
    pub card: AgentCard,
    /// When the agent was registered.
    pub registered_at: DateTime<Utc>,
    /// When the agent was last probed.
    pub last_health_check: Option<DateTime<Utc>>,
    /// Advisory liveness status.
    pub status: AgentStatus,
}

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Agent '{0}' is not registered")]
    NotFound(String),
    #[error("Agent '{0}' is not active (status: {1:?})")]
    NotActive(String, AgentStatus),
}

/// Health-check probe timeout.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// In-memory directory of known agents.
pub struct CapabilityRegistry {
    agents: DashMap<String, RegistryEntry>,
    http: reqwest::Client,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
            http: reqwest::Client::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register an agent from a full discovery card. Declarative entries
    /// loaded from config and freshly discovered agents both start active.
    pub fn register(&self, card: AgentCard) {
        log::info!("Registering agent '{}' at {}", card.name, card.url);
        let name = card.name.clone();
        self.agents.insert(
            name,
            RegistryEntry {
                card,
                registered_at: Utc::now(),
                last_health_check: None,
                status: AgentStatus::Active,
            },
        );
    }

    /// Dynamic self-registration: the agent supplies only its name and
    /// address, and the registry synthesizes a minimal card.
    pub fn register_self(&self, agent_name: &str, agent_url: &str) {
        log::info!("Self-registration from '{}' at {}", agent_name, agent_url);
        self.register(AgentCard::minimal(agent_name, agent_url));
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Get an entry by exact name.
    pub fn get(&self, agent_name: &str) -> Option<RegistryEntry> {
        self.agents.get(agent_name).map(|entry| entry.clone())
    }

    /// Get an entry by name, requiring it to exist and be active.
    pub fn get_active(&self, agent_name: &str) -> Result<RegistryEntry, RegistryError> {
        let entry = self
            .get(agent_name)
            .ok_or_else(|| RegistryError::NotFound(agent_name.to_string()))?;
        if entry.status != AgentStatus::Active {
            return Err(RegistryError::NotActive(agent_name.to_string(), entry.status));
        }
        Ok(entry)
    }

    /// All active agents advertising the given skill id. No ranking; the
    /// caller picks one, typically the first.
    pub fn find_by_skill(&self, skill_id: &str) -> Vec<RegistryEntry> {
        self.agents
            .iter()
            .filter(|entry| entry.status == AgentStatus::Active && entry.card.has_skill(skill_id))
            .map(|entry| entry.clone())
            .collect()
    }

    /// List all entries, optionally restricted to active ones.
    pub fn list(&self, only_active: bool) -> Vec<RegistryEntry> {
        self.agents
            .iter()
            .filter(|entry| !only_active || entry.status == AgentStatus::Active)
            .map(|entry| entry.clone())
            .collect()
    }

    /// Name -> base URL for all active agents.
    pub fn endpoints(&self) -> Vec<(String, String)> {
        self.agents
            .iter()
            .filter(|entry| entry.status == AgentStatus::Active)
            .map(|entry| (entry.card.name.clone(), entry.card.url.clone()))
            .collect()
    }

    /// Manually override an entry's status. Used by operators to disable a
    /// misbehaving agent without waiting for a probe.
    pub fn set_status(&self, agent_name: &str, status: AgentStatus) -> bool {
        match self.agents.get_mut(agent_name) {
            Some(mut entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Health checks
    // -----------------------------------------------------------------------

    /// Probe one agent's `/health` endpoint and update its advisory status.
    ///
    /// Returns the new status, or `None` for an unknown agent. The entry is
    /// never removed on failure.
    pub async fn health_check(&self, agent_name: &str) -> Option<AgentStatus> {
        let url = self.get(agent_name)?.card.url;
        let health_url = format!("{}/health", url.trim_end_matches('/'));

        let status = match self
            .http
            .get(&health_url)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => AgentStatus::Active,
            Ok(resp) => {
                log::warn!(
                    "Health check for '{}' returned HTTP {}",
                    agent_name,
                    resp.status()
                );
                AgentStatus::Unhealthy
            }
            Err(e) => {
                log::warn!("Health check failed for '{}': {}", agent_name, e);
                AgentStatus::Unreachable
            }
        };

        if let Some(mut entry) = self.agents.get_mut(agent_name) {
            entry.last_health_check = Some(Utc::now());
            entry.status = status;
        }
        Some(status)
    }

    /// Probe every registered agent concurrently.
    pub async fn health_check_all(&self) -> Vec<(String, AgentStatus)> {
        let names: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        let checks = names.iter().map(|name| self.health_check(name));
        let statuses = futures::future::join_all(checks).await;
        names
            .into_iter()
            .zip(statuses)
            .filter_map(|(name, status)| status.map(|s| (name, s)))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// Bulk re-discovery: probe a set of well-known base addresses for
    /// discovery cards and overwrite entries from whatever each returns.
    /// Recovers from a cold start where no agents were known from config.
    pub async fn refresh(&self, well_known_urls: &[String]) -> usize {
        let mut discovered = 0;
        for base in well_known_urls {
            let card_url = format!("{}/.well-known/agent.json", base.trim_end_matches('/'));
            log::debug!("Probing discovery card at {}", card_url);
            let resp = match self
                .http
                .get(&card_url)
                .timeout(HEALTH_CHECK_TIMEOUT)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => resp,
                Ok(resp) => {
                    log::debug!("Discovery probe {} returned HTTP {}", card_url, resp.status());
                    continue;
                }
                Err(e) => {
                    log::debug!("Discovery probe {} failed: {}", card_url, e);
                    continue;
                }
            };

            match resp.json::<AgentCard>().await {
                Ok(card) => {
                    self.register(card);
                    discovered += 1;
                }
                Err(e) => log::warn!("Invalid discovery card from {}: {}", card_url, e),
            }
        }
        log::info!("Registry refresh discovered {} agents", discovered);
        discovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AgentSkill;

    fn card(name: &str, skills: &[&str]) -> AgentCard {
        let mut card = AgentCard::minimal(name, format!("http://localhost:1/{}", name));
        card.skills = skills.iter().map(|s| AgentSkill::from_id(*s)).collect();
        card
    }

    #[test]
    fn test_register_and_get() {
        let registry = CapabilityRegistry::new();
        registry.register(card("menu", &["lookup"]));
        let entry = registry.get("menu").unwrap();
        assert_eq!(entry.status, AgentStatus::Active);
        assert!(registry.get("ghost").is_none());
    }

    #[test]
    fn test_self_registration_synthesizes_minimal_card() {
        let registry = CapabilityRegistry::new();
        registry.register_self("menu", "http://localhost:10002");
        let entry = registry.get("menu").unwrap();
        assert_eq!(entry.card.description, "Self-registered agent");
        assert!(entry.card.skills.is_empty());
    }

    #[test]
    fn test_find_by_skill_excludes_inactive() {
        let registry = CapabilityRegistry::new();
        registry.register(card("menu", &["lookup"]));
        registry.register(card("orders", &["lookup", "history"]));

        assert_eq!(registry.find_by_skill("lookup").len(), 2);
        registry.set_status("menu", AgentStatus::Unreachable);
        let found = registry.find_by_skill("lookup");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].card.name, "orders");
        // Entry still present, just not active.
        assert!(registry.get("menu").is_some());
    }

    #[test]
    fn test_get_active_errors() {
        let registry = CapabilityRegistry::new();
        assert!(matches!(
            registry.get_active("menu"),
            Err(RegistryError::NotFound(_))
        ));
        registry.register(card("menu", &[]));
        assert!(registry.get_active("menu").is_ok());
        registry.set_status("menu", AgentStatus::Unhealthy);
        assert!(matches!(
            registry.get_active("menu"),
            Err(RegistryError::NotActive(_, AgentStatus::Unhealthy))
        ));
    }

    #[tokio::test]
    async fn test_health_check_marks_unreachable_without_removing() {
        let registry = CapabilityRegistry::new();
        // Nothing listens on this port.
        registry.register(AgentCard::minimal("menu", "http://127.0.0.1:1"));
        let status = registry.health_check("menu").await;
        assert_eq!(status, Some(AgentStatus::Unreachable));
        let entry = registry.get("menu").unwrap();
        assert_eq!(entry.status, AgentStatus::Unreachable);
        assert!(entry.last_health_check.is_some());
    }

    #[tokio::test]
    async fn test_health_check_unknown_agent() {
        let registry = CapabilityRegistry::new();
        assert_eq!(registry.health_check("ghost").await, None);
    }
}
