//! The delegation engine: classify, route, and dispatch one task.
//!
//! Every attempt is journaled on its session: routing may record
//! `classification_failed` plus `fallback_routed`, then `delegation_started`
//! names the chosen agent, and exactly one of `delegation_completed` or
//! `delegation_failed` closes the attempt.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::breaker::{BreakerError, BreakerRegistry, CircuitBreakerConfig};
use crate::delegation::classifier::{ClassifierOracle, RoutingDecision};
use crate::delegation::client::AgentClient;
use crate::delegation::keyword::KeywordRouter;
use crate::protocol::TaskRequest;
use crate::registry::CapabilityRegistry;
use crate::session::SessionStore;

/// Skill invoked when the target's card does not advertise a better match.
pub const DEFAULT_SKILL: &str = "process_task";

/// Terminal status of one delegation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Completed,
    Failed,
}

/// The full record of one delegation attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DelegationOutcome {
    pub status: DelegationStatus,
    pub session_id: String,
    /// Target agent, when routing got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_executed: Option<String>,
    /// Routing decision, absent on the direct-delegation path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

/// A breaker timeout shorter than the client timeout would fire first and
/// make the configured call bound unreachable, so it is raised to match.
fn align_call_timeout(
    mut config: CircuitBreakerConfig,
    client: &AgentClient,
) -> CircuitBreakerConfig {
    let client_secs = client.timeout().as_secs();
    if config.call_timeout_secs < client_secs {
        log::warn!(
            "Breaker call timeout {}s is shorter than the client timeout {}s; raising it",
            config.call_timeout_secs,
            client_secs
        );
        config.call_timeout_secs = client_secs;
    }
    config
}

/// Routes task requests to worker agents.
pub struct DelegationEngine {
    registry: Arc<CapabilityRegistry>,
    sessions: Arc<SessionStore>,
    breakers: BreakerRegistry,
    classifier: Option<Arc<dyn ClassifierOracle>>,
    fallback: KeywordRouter,
    client: AgentClient,
}

impl DelegationEngine {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        sessions: Arc<SessionStore>,
        fallback: KeywordRouter,
        client: AgentClient,
    ) -> Self {
        let breakers =
            BreakerRegistry::new(align_call_timeout(CircuitBreakerConfig::default(), &client));
        Self {
            registry,
            sessions,
            breakers,
            classifier: None,
            fallback,
            client,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ClassifierOracle>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breakers = BreakerRegistry::new(align_call_timeout(config, &self.client));
        self
    }

    /// The per-target breaker registry, for status endpoints.
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Classify `query` and delegate it to the chosen agent.
    ///
    /// `session_id` continues an existing session; `None` starts a new one.
    pub async fn route_and_delegate(
        &self,
        query: &str,
        params: Map<String, Value>,
        session_id: Option<&str>,
    ) -> DelegationOutcome {
        let started = Instant::now();
        let session_id = self.ensure_session(session_id, json!({"query": query}));

        let decision = self.decide(query, &session_id).await;
        let target = decision.target_agent.clone();
        log::info!(
            "Routing query to '{}' ({}, confidence {:.2})",
            target,
            decision.query_type,
            decision.confidence
        );
        self.sessions.append_event(
            &session_id,
            "delegation_started",
            json!({"agent": target, "query": query}),
        );

        let entry = match self.registry.get_active(&target) {
            Ok(entry) => entry,
            Err(e) => {
                return self.fail(
                    &session_id,
                    Some(target),
                    None,
                    Some(decision),
                    e.to_string(),
                    started,
                );
            }
        };

        let skill = self.pick_skill(&entry.card, &decision.query_type);
        let mut params = params;
        params
            .entry("query".to_string())
            .or_insert_with(|| Value::String(query.to_string()));

        self.dispatch(&session_id, &entry.card.url, &target, &skill, params, Some(decision), started)
            .await
    }

    /// Direct delegation to a named agent and skill, skipping classification.
    pub async fn delegate_task(
        &self,
        agent: &str,
        skill: &str,
        params: Map<String, Value>,
        session_id: Option<&str>,
    ) -> DelegationOutcome {
        let started = Instant::now();
        let session_id =
            self.ensure_session(session_id, json!({"agent": agent, "skill": skill}));
        self.sessions.append_event(
            &session_id,
            "delegation_started",
            json!({"agent": agent, "skill": skill}),
        );

        let entry = match self.registry.get_active(agent) {
            Ok(entry) => entry,
            Err(e) => {
                return self.fail(
                    &session_id,
                    Some(agent.to_string()),
                    Some(skill.to_string()),
                    None,
                    e.to_string(),
                    started,
                );
            }
        };

        self.dispatch(&session_id, &entry.card.url, agent, skill, params, None, started)
            .await
    }

    fn ensure_session(&self, session_id: Option<&str>, metadata: Value) -> String {
        match session_id {
            Some(id) if self.sessions.get(id).is_some() => id.to_string(),
            _ => self.sessions.create_session(metadata),
        }
    }

    /// Ask the oracle; on any failure fall back to the keyword table and
    /// record both facts on the session.
    async fn decide(&self, query: &str, session_id: &str) -> RoutingDecision {
        if let Some(classifier) = &self.classifier {
            match classifier.classify(query).await {
                Ok(decision) => return decision,
                Err(e) => {
                    log::warn!("Classifier unavailable, using keyword fallback: {}", e);
                    self.sessions.append_event(
                        session_id,
                        "classification_failed",
                        json!({"error": e.to_string()}),
                    );
                }
            }
        }

        let decision = self.fallback.route(query);
        self.sessions.append_event(
            session_id,
            "fallback_routed",
            json!({
                "target_agent": decision.target_agent,
                "query_type": decision.query_type,
            }),
        );
        decision
    }

    /// Prefer a skill whose id matches the query type, then the card's first
    /// advertised skill.
    fn pick_skill(&self, card: &crate::protocol::AgentCard, query_type: &str) -> String {
        if card.has_skill(query_type) {
            return query_type.to_string();
        }
        card.skills
            .first()
            .map(|s| s.id.clone())
            .unwrap_or_else(|| DEFAULT_SKILL.to_string())
    }

    async fn dispatch(
        &self,
        session_id: &str,
        url: &str,
        agent: &str,
        skill: &str,
        params: Map<String, Value>,
        routing: Option<RoutingDecision>,
        started: Instant,
    ) -> DelegationOutcome {
        let task = TaskRequest::new(
            skill,
            params.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        );
        let breaker = self.breakers.get(agent);
        let outcome = breaker
            .call(|| self.client.call_skill(url, skill, params))
            .await;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                let response = task.completed(agent, result, execution_time_ms as i64);
                self.sessions.append_event(
                    session_id,
                    "delegation_completed",
                    json!({
                        "agent": agent,
                        "skill": skill,
                        "task_id": response.task_id,
                        "trace_id": response.trace_id,
                        "execution_time_ms": execution_time_ms,
                    }),
                );
                DelegationOutcome {
                    status: DelegationStatus::Completed,
                    session_id: session_id.to_string(),
                    delegated_to: Some(agent.to_string()),
                    skill_executed: Some(skill.to_string()),
                    routing,
                    result: response.results,
                    error: None,
                    execution_time_ms,
                }
            }
            Err(e) => {
                let error = match &e {
                    BreakerError::Open { .. } => format!("Circuit open for agent '{}'", agent),
                    BreakerError::Timeout { timeout_secs, .. } => {
                        format!("Call to agent '{}' timed out after {}s", agent, timeout_secs)
                    }
                    BreakerError::Inner(inner) => inner.to_string(),
                };
                log::warn!("Delegation failed: {}", error);
                let response = task.failed(agent, error, execution_time_ms as i64);
                self.sessions.append_event(
                    session_id,
                    "delegation_failed",
                    json!({
                        "agent": agent,
                        "task_id": response.task_id,
                        "trace_id": response.trace_id,
                        "error": response.error_message,
                    }),
                );
                DelegationOutcome {
                    status: DelegationStatus::Failed,
                    session_id: session_id.to_string(),
                    delegated_to: Some(agent.to_string()),
                    skill_executed: Some(skill.to_string()),
                    routing,
                    result: None,
                    error: response.error_message,
                    execution_time_ms,
                }
            }
        }
    }

    fn fail(
        &self,
        session_id: &str,
        delegated_to: Option<String>,
        skill_executed: Option<String>,
        routing: Option<RoutingDecision>,
        error: String,
        started: Instant,
    ) -> DelegationOutcome {
        log::warn!("Delegation failed: {}", error);
        self.sessions.append_event(
            session_id,
            "delegation_failed",
            json!({"agent": delegated_to, "error": error}),
        );
        DelegationOutcome {
            status: DelegationStatus::Failed,
            session_id: session_id.to_string(),
            delegated_to,
            skill_executed,
            routing,
            result: None,
            error: Some(error),
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::classifier::RoutingMethod;
    use crate::dispatch::{dispatch_router, DispatchState, SkillSet};
    use crate::protocol::{AgentCard, AgentSkill, ErrorCode, RpcError};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FailingOracle;

    #[async_trait]
    impl ClassifierOracle for FailingOracle {
        async fn classify(&self, _query: &str) -> Result<RoutingDecision, anyhow::Error> {
            anyhow::bail!("classifier offline")
        }
    }

    fn engine(registry: Arc<CapabilityRegistry>, sessions: Arc<SessionStore>) -> DelegationEngine {
        DelegationEngine::new(
            registry,
            sessions,
            KeywordRouter::with_default_rules("general"),
            AgentClient::new("orchestrator", None).with_timeout(Duration::from_secs(5)),
        )
    }

    async fn serve_menu_agent() -> String {
        let mut skills = SkillSet::new();
        skills.register(
            AgentSkill::from_id("menu"),
            Arc::new(|params: Map<String, Value>| async move {
                let query = params
                    .get("query")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RpcError::from_code(ErrorCode::InvalidParams))?
                    .to_string();
                Ok(json!({"answer": format!("menu response to: {}", query)}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let state = DispatchState::new("menu", "Menu agent", &url, skills);
        tokio::spawn(async move {
            axum::serve(listener, dispatch_router(state)).await.unwrap();
        });
        url
    }

    #[tokio::test]
    async fn test_end_to_end_menu_lookup_via_fallback() {
        let url = serve_menu_agent().await;
        let registry = Arc::new(CapabilityRegistry::new());
        let mut card = AgentCard::minimal("menu", &url);
        card.skills = vec![AgentSkill::from_id("menu")];
        registry.register(card);

        let sessions = Arc::new(SessionStore::new());
        let engine = engine(registry, sessions.clone());

        let outcome = engine
            .route_and_delegate("show me the menu", Map::new(), None)
            .await;
        assert_eq!(outcome.status, DelegationStatus::Completed);
        assert_eq!(outcome.delegated_to.as_deref(), Some("menu"));
        assert_eq!(outcome.skill_executed.as_deref(), Some("menu"));
        assert!(outcome.result.unwrap()["answer"]
            .as_str()
            .unwrap()
            .contains("show me the menu"));

        let session = sessions.get(&outcome.session_id).unwrap();
        let types: Vec<&str> = session.history.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "session_created",
                "fallback_routed",
                "delegation_started",
                "delegation_completed"
            ]
        );

        let completed = session.history.last().unwrap();
        let task_id = completed.details["task_id"].as_str().unwrap();
        let trace_id = completed.details["trace_id"].as_str().unwrap();
        assert!(task_id.starts_with("task_"));
        assert!(trace_id.starts_with("trace_"));
    }

    #[tokio::test]
    async fn test_classifier_failure_records_events_then_falls_back() {
        let url = serve_menu_agent().await;
        let registry = Arc::new(CapabilityRegistry::new());
        let mut card = AgentCard::minimal("menu", &url);
        card.skills = vec![AgentSkill::from_id("menu")];
        registry.register(card);

        let sessions = Arc::new(SessionStore::new());
        let engine =
            engine(registry, sessions.clone()).with_classifier(Arc::new(FailingOracle));

        let outcome = engine
            .route_and_delegate("any vegan dishes?", Map::new(), None)
            .await;
        assert_eq!(outcome.status, DelegationStatus::Completed);
        let routing = outcome.routing.unwrap();
        assert_eq!(routing.method, RoutingMethod::Fallback);

        let session = sessions.get(&outcome.session_id).unwrap();
        let types: Vec<&str> = session.history.iter().map(|e| e.event_type.as_str()).collect();
        assert!(types.contains(&"classification_failed"));
        assert!(types.contains(&"fallback_routed"));
    }

    #[tokio::test]
    async fn test_breaker_timeout_never_undercuts_client_timeout() {
        let registry = Arc::new(CapabilityRegistry::new());
        let sessions = Arc::new(SessionStore::new());
        // Default client timeout is 300s, well above the breaker default.
        let engine = DelegationEngine::new(
            registry.clone(),
            sessions.clone(),
            KeywordRouter::with_default_rules("general"),
            AgentClient::new("orchestrator", None),
        );
        let status = engine.breakers().get("menu").status();
        assert_eq!(status.config.call_timeout_secs, 300);

        // An explicitly shorter breaker config is raised too.
        let engine = DelegationEngine::new(
            registry,
            sessions,
            KeywordRouter::with_default_rules("general"),
            AgentClient::new("orchestrator", None),
        )
        .with_breaker_config(CircuitBreakerConfig {
            call_timeout_secs: 30,
            ..Default::default()
        });
        let status = engine.breakers().get("menu").status();
        assert_eq!(status.config.call_timeout_secs, 300);
    }

    #[tokio::test]
    async fn test_unknown_agent_fails_with_terminal_event() {
        let registry = Arc::new(CapabilityRegistry::new());
        let sessions = Arc::new(SessionStore::new());
        let engine = engine(registry, sessions.clone());

        let outcome = engine
            .delegate_task("ghost", "lookup", Map::new(), None)
            .await;
        assert_eq!(outcome.status, DelegationStatus::Failed);
        assert!(outcome.error.unwrap().contains("ghost"));

        let session = sessions.get(&outcome.session_id).unwrap();
        let terminal: Vec<&str> = session
            .history
            .iter()
            .filter(|e| {
                e.event_type == "delegation_completed" || e.event_type == "delegation_failed"
            })
            .map(|e| e.event_type.as_str())
            .collect();
        assert_eq!(terminal, vec!["delegation_failed"]);
    }

    #[tokio::test]
    async fn test_unreachable_agent_counts_breaker_failure() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(AgentCard::minimal("menu", "http://127.0.0.1:1"));
        let sessions = Arc::new(SessionStore::new());
        let engine = engine(registry, sessions.clone());

        let outcome = engine
            .delegate_task("menu", "lookup", Map::new(), None)
            .await;
        assert_eq!(outcome.status, DelegationStatus::Failed);
        let status = engine.breakers().get("menu").status();
        assert_eq!(status.failure_count, 1);
    }

    #[tokio::test]
    async fn test_disabled_agent_fails_until_remarked_active() {
        let url = serve_menu_agent().await;
        let registry = Arc::new(CapabilityRegistry::new());
        let mut card = AgentCard::minimal("menu", &url);
        card.skills = vec![AgentSkill::from_id("menu")];
        registry.register(card);
        let sessions = Arc::new(SessionStore::new());
        let engine = engine(registry.clone(), sessions);

        registry.set_status("menu", crate::registry::AgentStatus::Unreachable);
        let outcome = engine
            .route_and_delegate("show me the menu", Map::new(), None)
            .await;
        assert_eq!(outcome.status, DelegationStatus::Failed);
        assert!(outcome.error.unwrap().contains("not active"));

        registry.set_status("menu", crate::registry::AgentStatus::Active);
        let outcome = engine
            .route_and_delegate("show me the menu", Map::new(), None)
            .await;
        assert_eq!(outcome.status, DelegationStatus::Completed);
    }

    #[tokio::test]
    async fn test_existing_session_is_continued() {
        let registry = Arc::new(CapabilityRegistry::new());
        let sessions = Arc::new(SessionStore::new());
        let id = sessions.create_session(json!({}));
        let engine = engine(registry, sessions.clone());

        let outcome = engine
            .delegate_task("ghost", "lookup", Map::new(), Some(&id))
            .await;
        assert_eq!(outcome.session_id, id);
        assert!(sessions.get(&id).unwrap().history.len() > 1);
    }
}
