//! agentmesh agent server binary.
//!
//! Starts one agent's dispatch server. The plain worker build exposes an
//! `echo` skill; when this agent is the configured delegation default it also
//! exposes `delegate_task` backed by the delegation engine.
//!
//! # Environment Variables
//!
//! - `AGENT_NAME`      — Registry name of this agent (default: "general")
//! - `PORT`            — HTTP port (default: 10001)
//! - `AGENTMESH_CONFIG`— Path to the YAML system config (optional)
//! - `TOKEN_SECRET`    — Token-signing secret (required when security is on)
//! - `RUST_LOG`        — Tracing filter (default: "info")
//!
//! # Usage
//!
//! ```bash
//! AGENT_NAME=menu PORT=10002 cargo run --bin agent-server
//! ```

use std::sync::Arc;

use serde_json::{json, Map, Value};

use agentmesh::delegation::{AgentClient, DelegationEngine, HttpClassifier, KeywordRouter};
use agentmesh::dispatch::{dispatch_router, DispatchState, SkillSet};
use agentmesh::protocol::{AgentSkill, ErrorCode, RpcError};
use agentmesh::registry::CapabilityRegistry;
use agentmesh::security::{AuditLog, SecurityManager};
use agentmesh::session::SessionStore;
use agentmesh::SystemConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,agentmesh=debug".into()),
        )
        .init();

    let agent_name = std::env::var("AGENT_NAME").unwrap_or_else(|_| "general".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "10001".to_string());
    let bind_addr = format!("0.0.0.0:{}", port);

    let config = match std::env::var("AGENTMESH_CONFIG") {
        Ok(path) => match SystemConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to load config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        Err(_) => SystemConfig::default(),
    };

    let base_url = config
        .agent_url(&agent_name)
        .unwrap_or_else(|| format!("http://localhost:{}", port));

    // Security layer.
    let security = if config.security.enabled {
        let secret = match std::env::var("TOKEN_SECRET") {
            Ok(secret) => secret,
            Err(_) => {
                tracing::error!("Security is enabled but TOKEN_SECRET is not set");
                std::process::exit(1);
            }
        };
        let audit = AuditLog::with_batch_size(
            &config.security.audit_log_path,
            config.security.audit_batch_size,
        );
        Some(Arc::new(SecurityManager::with_token_ttl(
            secret,
            config.security.token_ttl_secs as i64,
            audit,
        )))
    } else {
        None
    };

    // Registry seeded from the config's agent table.
    let registry = Arc::new(CapabilityRegistry::new());
    config.register_agents(&registry);

    let sessions = match &config.session_db_path {
        Some(path) => match SessionStore::with_storage(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!("Failed to open session store {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => Arc::new(SessionStore::new()),
    };

    let mut skills = SkillSet::new();
    skills.register(
        AgentSkill::from_id("echo"),
        Arc::new(|params: Map<String, Value>| async move {
            Ok::<Value, RpcError>(json!({"echo": Value::Object(params)}))
        }),
    );

    // The delegation default agent carries the orchestration skill.
    if agent_name == config.delegation.default_agent {
        let client = AgentClient::new(agent_name.clone(), security.clone()).with_timeout(
            std::time::Duration::from_secs(config.delegation.request_timeout_secs),
        );
        let mut engine = DelegationEngine::new(
            registry.clone(),
            sessions.clone(),
            KeywordRouter::with_default_rules(&config.delegation.default_agent),
            client,
        )
        .with_breaker_config(config.breaker.clone());

        if let Some(classifier_agent) = &config.delegation.classifier_agent {
            if let Some(url) = config.agent_url(classifier_agent) {
                engine = engine.with_classifier(Arc::new(HttpClassifier::new(url)));
            } else {
                tracing::warn!(
                    "Classifier agent '{}' is not in the agent table; using keyword fallback only",
                    classifier_agent
                );
            }
        }

        let engine = Arc::new(engine);
        skills.register(
            AgentSkill::from_id("delegate_task"),
            Arc::new(move |params: Map<String, Value>| {
                let engine = engine.clone();
                async move {
                    let query = params
                        .get("query")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| {
                            RpcError::new(ErrorCode::InvalidParams, "Missing 'query'")
                        })?
                        .to_string();
                    let session_id = params
                        .get("session_id")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                    let outcome = engine
                        .route_and_delegate(&query, params, session_id.as_deref())
                        .await;
                    serde_json::to_value(&outcome).map_err(|e| {
                        RpcError::new(ErrorCode::InternalError, e.to_string())
                    })
                }
            }),
        );
    }

    let mut state = DispatchState::new(
        agent_name.clone(),
        config
            .agents
            .get(&agent_name)
            .map(|a| a.description.clone())
            .unwrap_or_default(),
        base_url,
        skills,
    )
    .allow_unauthenticated_loopback(config.security.allow_unauthenticated_loopback);
    if let Some(security) = security {
        state = state.with_security(security);
    }

    let app = dispatch_router(state);

    tracing::info!("agentmesh '{}' starting on {}", agent_name, bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  POST /                       — JSON-RPC skill dispatch");
    tracing::info!("  GET  /health                 — liveness probe");
    tracing::info!("  GET  /.well-known/agent.json — discovery card");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .expect("Server failed");
}
