//! Axum route handlers for the agent dispatch server.
//!
//! The JSON-RPC handler enforces a fixed validation order: parse, resolve
//! identity, request shape, authorization, method lookup, invocation. Auth
//! failures map to HTTP 401/403 with a JSON-RPC error body; protocol errors
//! are HTTP 200 with the error member set.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::protocol::{ErrorCode, RpcError, RpcRequest, RpcResponse};
use crate::security::{Credential, Permission, ResolvedIdentity, SecurityError};

use super::DispatchState;

/// Build the dispatch router for one agent.
pub fn dispatch_router(state: DispatchState) -> Router {
    Router::new()
        .route("/", post(rpc_handler))
        .route("/execute", post(rpc_handler))
        .route("/health", get(health_handler))
        .route("/capabilities", get(capabilities_handler))
        .route("/agent_card", get(agent_card_handler))
        .route("/.well-known/agent.json", get(agent_card_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health — liveness probe. Always served without authentication so
/// registries can probe agents they hold no credentials for.
async fn health_handler(State(state): State<DispatchState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "agent": state.agent_name,
        "version": state.version,
        "skills": state.skills.names(),
        "timestamp": Utc::now().to_rfc3339(),
        "checks": {
            "security": state.security.is_some(),
            "skill_count": state.skills.skills().len(),
        },
    }))
}

/// GET /capabilities — the skill inventory.
async fn capabilities_handler(State(state): State<DispatchState>) -> impl IntoResponse {
    Json(json!({
        "agent_name": state.agent_name,
        "description": state.description,
        "version": state.version,
        "skills": state.skills.skills(),
    }))
}

/// GET /agent_card and /.well-known/agent.json — the discovery card.
async fn agent_card_handler(State(state): State<DispatchState>) -> impl IntoResponse {
    Json(state.agent_card())
}

/// Identity of the caller after inbound validation.
enum Caller {
    /// Security disabled, or an allowed credential-less loopback request.
    Unauthenticated,
    /// A resolved credential.
    Authenticated(ResolvedIdentity),
}

impl Caller {
    fn agent_id(&self) -> &str {
        match self {
            Caller::Unauthenticated => "loopback",
            Caller::Authenticated(identity) => &identity.agent_id,
        }
    }
}

/// POST / and POST /execute — JSON-RPC skill dispatch.
///
/// The body is taken raw so a malformed payload yields a -32700 JSON-RPC
/// error instead of a framework-level 4xx.
async fn rpc_handler(
    State(state): State<DispatchState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    // 1. Parse.
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            log::warn!("Rejected unparseable request: {}", e);
            return (
                StatusCode::OK,
                Json(RpcResponse::error(
                    RpcError::new(ErrorCode::ParseError, format!("Parse error: {}", e)),
                    Value::Null,
                )),
            );
        }
    };
    let id = request.id.clone();

    // 2. Resolve identity.
    let caller = match resolve_caller(&state, &headers, connect_info) {
        Ok(caller) => caller,
        Err((status, error)) => return (status, Json(RpcResponse::error(error, id))),
    };

    // 3. Request shape.
    let method = match request.method.as_deref() {
        Some(method) if !method.is_empty() => method.to_string(),
        _ => {
            return (
                StatusCode::OK,
                Json(RpcResponse::error(
                    RpcError::new(ErrorCode::InvalidRequest, "Missing method"),
                    id,
                )),
            )
        }
    };

    // 4. Authorization.
    if let (Some(security), Caller::Authenticated(identity)) = (&state.security, &caller) {
        let resource = format!("agent:{}:{}", state.agent_name, method);
        if let Err(e) = security.authorize(&identity.agent_id, &resource, Permission::Execute, None)
        {
            let code = match e {
                SecurityError::AuthenticationFailed { .. } => ErrorCode::AuthenticationRequired,
                SecurityError::AuthorizationDenied { .. } => ErrorCode::AuthorizationFailed,
            };
            return (
                StatusCode::FORBIDDEN,
                Json(RpcResponse::error(RpcError::new(code, e.to_string()), id)),
            );
        }
    }

    // 5. Method lookup.
    let Some(handler) = state.skills.get(&method) else {
        return (
            StatusCode::OK,
            Json(RpcResponse::error(
                RpcError::new(
                    ErrorCode::MethodNotFound,
                    format!("Method not found: {}", method),
                ),
                id,
            )),
        );
    };

    // 6. Invocation.
    log::debug!(
        "Dispatching skill '{}' for caller '{}'",
        method,
        caller.agent_id()
    );
    // Skills run in their own task so a panic surfaces as a protocol error
    // instead of tearing down the connection.
    let params = request.params;
    let outcome = match tokio::spawn(async move { handler.handle(params).await }).await {
        Ok(outcome) => outcome,
        Err(join_error) => {
            log::error!("Skill '{}' panicked: {}", method, join_error);
            Err(RpcError::from_code(ErrorCode::InternalError))
        }
    };
    if let Some(security) = &state.security {
        let result = if outcome.is_ok() { "success" } else { "failure" };
        security.log_skill_call(caller.agent_id(), &state.agent_name, &method, result);
    }

    match outcome {
        Ok(result) => (StatusCode::OK, Json(RpcResponse::success(result, id))),
        Err(error) => {
            log::warn!("Skill '{}' failed: {}", method, error);
            (StatusCode::OK, Json(RpcResponse::error(error, id)))
        }
    }
}

/// Resolve the caller identity for one inbound request.
fn resolve_caller(
    state: &DispatchState,
    headers: &HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Result<Caller, (StatusCode, RpcError)> {
    let Some(security) = &state.security else {
        return Ok(Caller::Unauthenticated);
    };

    let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    let authorization = headers.get("authorization").and_then(|v| v.to_str().ok());

    match Credential::from_headers(api_key, authorization) {
        Some(credential) => match security.validate_credential(&credential) {
            Ok(identity) => Ok(Caller::Authenticated(identity)),
            Err(e) => Err((
                StatusCode::UNAUTHORIZED,
                RpcError::new(ErrorCode::AuthenticationRequired, e.to_string()),
            )),
        },
        None => {
            // Without a peer address locality cannot be proven; fail closed.
            let is_loopback = connect_info
                .map(|ConnectInfo(addr)| addr.ip().is_loopback())
                .unwrap_or(false);
            if state.allow_unauthenticated_loopback && is_loopback {
                log::debug!("Allowing unauthenticated loopback request");
                return Ok(Caller::Unauthenticated);
            }
            security.audit().record(
                "unknown",
                "authenticate",
                format!("agent:{}", state.agent_name),
                "failure",
                Some(json!({"reason": "missing_credentials"})),
            );
            Err((
                StatusCode::UNAUTHORIZED,
                RpcError::from_code(ErrorCode::AuthenticationRequired),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
