//! Security layer for inter-agent communication.
//!
//! [`SecurityManager`] combines token issuance/validation, static API keys,
//! ACL authorization, and the audit trail behind one facade. Instances are
//! constructed explicitly and passed in by the caller; there is no process
//! global, so tests can substitute isolated managers freely.

pub mod acl;
pub mod audit;
pub mod credential;
pub mod token;

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

pub use acl::{AccessControl, AclEntry, Permission};
pub use audit::{AuditLog, AuditRecord};
pub use credential::{Credential, CredentialKind, ResolvedIdentity};
pub use token::{IssuedToken, TokenClaims, TokenError, TokenManager};

/// Security failures surfaced to callers.
///
/// Display output is deliberately generic; the full reason is written to the
/// audit trail only.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Credentials invalid or missing.
    #[error("Access denied")]
    AuthenticationFailed {
        /// Internal reason, audit-only.
        reason: String,
    },
    /// Valid identity, insufficient permission.
    #[error("Access denied")]
    AuthorizationDenied {
        /// Internal reason, audit-only.
        reason: String,
    },
}

/// Combined security manager: credentials, ACL, and audit.
pub struct SecurityManager {
    tokens: TokenManager,
    acl: AccessControl,
    audit: AuditLog,
    /// api_key -> agent_id
    api_keys: RwLock<HashMap<String, String>>,
    /// agent_id -> api_key
    agent_keys: RwLock<HashMap<String, String>>,
}

impl SecurityManager {
    /// Create a manager with the given token-signing secret and audit log.
    pub fn new(token_secret: impl Into<Vec<u8>>, audit: AuditLog) -> Self {
        Self::with_token_ttl(token_secret, token::DEFAULT_TOKEN_TTL_SECS, audit)
    }

    /// Like [`SecurityManager::new`], with an explicit token lifetime.
    pub fn with_token_ttl(
        token_secret: impl Into<Vec<u8>>,
        token_ttl_secs: i64,
        audit: AuditLog,
    ) -> Self {
        Self {
            tokens: TokenManager::with_ttl(token_secret, token_ttl_secs),
            acl: AccessControl::new(),
            audit,
            api_keys: RwLock::new(HashMap::new()),
            agent_keys: RwLock::new(HashMap::new()),
        }
    }

    /// The ACL evaluator, for startup-time entry loading.
    pub fn acl(&self) -> &AccessControl {
        &self.acl
    }

    /// The token manager, for client registration and token issuance.
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// The audit log.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    // -----------------------------------------------------------------------
    // Static API keys
    // -----------------------------------------------------------------------

    /// Register or rotate an agent's API key. A generated key is returned
    /// when none is supplied; any previous key for the agent is invalidated.
    pub fn register_api_key(&self, agent_id: &str, api_key: Option<String>) -> String {
        let api_key =
            api_key.unwrap_or_else(|| format!("a2a-{}-{}", agent_id, Uuid::new_v4().simple()));

        let mut keys = self.api_keys.write();
        let mut agents = self.agent_keys.write();
        if let Some(old) = agents.get(agent_id) {
            keys.remove(old);
        }
        keys.insert(api_key.clone(), agent_id.to_string());
        agents.insert(agent_id.to_string(), api_key.clone());

        log::info!("Registered API key for agent: {}", agent_id);
        api_key
    }

    /// Validate a static API key, returning the owning agent id.
    pub fn validate_api_key(&self, api_key: &str) -> Option<String> {
        if api_key.is_empty() {
            return None;
        }
        match self.api_keys.read().get(api_key) {
            Some(agent_id) => Some(agent_id.clone()),
            None => {
                let preview: String = api_key.chars().take(10).collect();
                log::warn!("Invalid API key attempted: {}...", preview);
                None
            }
        }
    }

    /// Get the current API key for an agent, if one is registered.
    pub fn agent_api_key(&self, agent_id: &str) -> Option<String> {
        self.agent_keys.read().get(agent_id).cloned()
    }

    /// Outbound headers an agent attaches when calling a peer.
    pub fn secure_headers(&self, agent_id: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        if let Some(key) = self.agent_api_key(agent_id) {
            headers.insert("X-API-Key".to_string(), key);
        }
        headers
    }

    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------

    /// Authenticate a client by shared secret and mint an access token.
    pub fn authenticate(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<IssuedToken, SecurityError> {
        match self.tokens.authenticate(client_id, client_secret) {
            Ok(issued) => {
                self.audit
                    .record(client_id, "authenticate", "token", "success", None);
                Ok(issued)
            }
            Err(e) => {
                self.audit.record(
                    client_id,
                    "authenticate",
                    "token",
                    "failure",
                    Some(json!({"reason": format!("{:?}", e)})),
                );
                Err(SecurityError::AuthenticationFailed {
                    reason: format!("token authentication failed: {:?}", e),
                })
            }
        }
    }

    /// Resolve a caller identity from either credential kind. The single
    /// entry point the dispatch server uses for inbound validation.
    pub fn validate_credential(
        &self,
        credential: &Credential,
    ) -> Result<ResolvedIdentity, SecurityError> {
        match credential {
            Credential::ApiKey(key) => match self.validate_api_key(key) {
                Some(agent_id) => Ok(ResolvedIdentity {
                    agent_id,
                    kind: CredentialKind::ApiKey,
                    claims: None,
                }),
                None => {
                    self.audit.record(
                        "unknown",
                        "authenticate",
                        "api_key",
                        "failure",
                        Some(json!({"reason": "invalid_api_key"})),
                    );
                    Err(SecurityError::AuthenticationFailed {
                        reason: "invalid API key".to_string(),
                    })
                }
            },
            Credential::Bearer(raw) => match self.tokens.validate(raw) {
                Ok(claims) => Ok(ResolvedIdentity {
                    agent_id: claims.sub.clone(),
                    kind: CredentialKind::Token,
                    claims: Some(claims),
                }),
                Err(e) => {
                    self.audit.record(
                        "unknown",
                        "authenticate",
                        "token",
                        "failure",
                        Some(json!({"reason": format!("{:?}", e)})),
                    );
                    Err(SecurityError::AuthenticationFailed {
                        reason: format!("token validation failed: {:?}", e),
                    })
                }
            },
        }
    }

    // -----------------------------------------------------------------------
    // Authorization
    // -----------------------------------------------------------------------

    /// Check that an identity holds `permission` on `resource`, auditing the
    /// decision either way.
    pub fn authorize(
        &self,
        agent_id: &str,
        resource: &str,
        permission: Permission,
        context: Option<&HashMap<String, Value>>,
    ) -> Result<(), SecurityError> {
        let granted = self.acl.check_permission(agent_id, resource, permission, context);
        let result = if granted { "success" } else { "failure" };
        self.audit.record(
            agent_id,
            "authorize",
            resource,
            result,
            Some(json!({"permission": format!("{:?}", permission).to_lowercase()})),
        );
        if granted {
            Ok(())
        } else {
            Err(SecurityError::AuthorizationDenied {
                reason: format!("{} lacks {:?} on {}", agent_id, permission, resource),
            })
        }
    }

    /// Validate an inter-agent request: the key must resolve, and the
    /// resolved identity must match the claimed source agent.
    pub fn validate_inter_agent_request(
        &self,
        api_key: &str,
        source_agent: &str,
        target_resource: &str,
    ) -> bool {
        let Some(agent_id) = self.validate_api_key(api_key) else {
            self.audit.record(
                "unknown",
                "inter_agent_auth",
                target_resource,
                "failure",
                Some(json!({"reason": "invalid_api_key"})),
            );
            return false;
        };

        if agent_id != source_agent {
            self.audit.record(
                agent_id,
                "inter_agent_auth",
                target_resource,
                "failure",
                Some(json!({"reason": "agent_mismatch", "claimed_agent": source_agent})),
            );
            return false;
        }

        self.audit
            .record(agent_id, "inter_agent_auth", target_resource, "success", None);
        true
    }

    /// Audit a skill invocation.
    pub fn log_skill_call(&self, agent_id: &str, agent: &str, skill: &str, result: &str) {
        self.audit.record(
            agent_id,
            "skill_call",
            format!("agent:{}:{}", agent, skill),
            result,
            None,
        );
    }
}
