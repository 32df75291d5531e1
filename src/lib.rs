//! # agentmesh
//!
//! Inter-agent communication substrate for multi-agent systems: worker agents
//! expose named skills behind a JSON-RPC dispatch server, an orchestrator
//! routes natural-language queries to them through a classifier with a
//! keyword fallback, and every hop is authenticated, authorized, audited,
//! circuit-breaker protected, and journaled on a session.

pub mod breaker;
pub mod config;
pub mod delegation;
pub mod dispatch;
pub mod protocol;
pub mod registry;
pub mod security;
pub mod session;

pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::SystemConfig;
pub use delegation::{AgentClient, DelegationEngine, DelegationOutcome, KeywordRouter};
pub use dispatch::{dispatch_router, DispatchState, SkillHandler, SkillSet};
pub use protocol::{AgentCard, AgentSkill, RpcError, RpcRequest, RpcResponse};
pub use registry::{AgentStatus, CapabilityRegistry, RegistryEntry};
pub use security::{AuditLog, Credential, SecurityManager};
pub use session::SessionStore;

/// Library version.
pub const VERSION: &str = "0.3.1";
