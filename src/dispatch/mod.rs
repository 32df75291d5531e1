//! Agent dispatch server: the JSON-RPC front door of every agent.
//!
//! Skills are registered in an explicit table at construction time; an
//! unregistered method name is a protocol error, never a reflection hit.
//!
//! # Endpoints
//!
//! - `POST /`                        — JSON-RPC skill dispatch
//! - `POST /execute`                 — Alias for `POST /`
//! - `GET  /health`                  — Liveness probe, never authenticated
//! - `GET  /capabilities`            — Skill inventory
//! - `GET  /agent_card`              — Full discovery card
//! - `GET  /.well-known/agent.json`  — Same card at the well-known path

pub mod routes;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::protocol::{AgentCard, AgentSkill, RpcError};
use crate::security::SecurityManager;

pub use routes::dispatch_router;

/// One skill implementation, invoked by registered name.
#[async_trait]
pub trait SkillHandler: Send + Sync {
    /// Execute the skill with the request's `params` object.
    async fn handle(&self, params: Map<String, Value>) -> Result<Value, RpcError>;
}

#[async_trait]
impl<F, Fut> SkillHandler for F
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, RpcError>> + Send,
{
    async fn handle(&self, params: Map<String, Value>) -> Result<Value, RpcError> {
        self(params).await
    }
}

/// Explicit skill registration table. The set of dispatchable methods is
/// exactly the set registered here.
#[derive(Default)]
pub struct SkillSet {
    handlers: HashMap<String, Arc<dyn SkillHandler>>,
    skills: Vec<AgentSkill>,
}

impl SkillSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill under `skill.id`. Re-registering a name replaces the
    /// previous handler.
    pub fn register(&mut self, skill: AgentSkill, handler: Arc<dyn SkillHandler>) -> &mut Self {
        self.skills.retain(|s| s.id != skill.id);
        self.handlers.insert(skill.id.clone(), handler);
        self.skills.push(skill);
        self
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn SkillHandler>> {
        self.handlers.get(method).cloned()
    }

    /// Advertised skill descriptors, in registration order.
    pub fn skills(&self) -> &[AgentSkill] {
        &self.skills
    }

    pub fn names(&self) -> Vec<String> {
        self.skills.iter().map(|s| s.id.clone()).collect()
    }
}

/// Shared state behind the dispatch routes.
#[derive(Clone)]
pub struct DispatchState {
    /// This agent's registry name.
    pub agent_name: String,
    /// Human-readable description, shown on the discovery card.
    pub description: String,
    /// Agent version string.
    pub version: String,
    /// Base URL this agent advertises on its card.
    pub base_url: String,
    /// The registered skill table.
    pub skills: Arc<SkillSet>,
    /// Security manager; `None` disables authentication entirely.
    pub security: Option<Arc<SecurityManager>>,
    /// Allow credential-less requests from loopback addresses even when
    /// security is enabled. Off by default.
    pub allow_unauthenticated_loopback: bool,
}

impl DispatchState {
    pub fn new(
        agent_name: impl Into<String>,
        description: impl Into<String>,
        base_url: impl Into<String>,
        skills: SkillSet,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            description: description.into(),
            version: crate::VERSION.to_string(),
            base_url: base_url.into(),
            skills: Arc::new(skills),
            security: None,
            allow_unauthenticated_loopback: false,
        }
    }

    pub fn with_security(mut self, security: Arc<SecurityManager>) -> Self {
        self.security = Some(security);
        self
    }

    pub fn allow_unauthenticated_loopback(mut self, allow: bool) -> Self {
        self.allow_unauthenticated_loopback = allow;
        self
    }

    /// Build the discovery card this agent serves.
    pub fn agent_card(&self) -> AgentCard {
        let mut card = AgentCard::minimal(&self.agent_name, &self.base_url);
        card.description = self.description.clone();
        card.version = self.version.clone();
        card.skills = self.skills.skills().to_vec();
        card
    }
}
