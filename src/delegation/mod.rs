//! Task delegation: classification, routing, and breaker-protected dispatch.
//!
//! The orchestrator hands a natural-language query to the
//! [`DelegationEngine`], which asks the [`ClassifierOracle`] for a target,
//! falls back to the [`KeywordRouter`] rule table when the oracle fails, and
//! invokes the chosen agent's skill through [`AgentClient`] wrapped in the
//! per-target circuit breaker. Every attempt is journaled on a session.

pub mod classifier;
pub mod client;
pub mod engine;
pub mod keyword;

pub use classifier::{ClassifierOracle, HttpClassifier, RoutingDecision, RoutingMethod};
pub use client::{AgentClient, ClientError, DEFAULT_CALL_TIMEOUT_SECS};
pub use engine::{DelegationEngine, DelegationOutcome, DelegationStatus};
pub use keyword::{KeywordRouter, KeywordRule, FALLBACK_CONFIDENCE};
