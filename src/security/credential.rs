//! Unified credential abstraction for inter-agent calls.
//!
//! The dispatch server validates either a long-lived static API key or a
//! signed bearer token through one polymorphic check, instead of two parallel
//! code paths.

use serde::{Deserialize, Serialize};

use super::token::TokenClaims;

/// A credential presented by a caller, extracted from request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Opaque static API key mapped 1:1 to an agent identity.
    ApiKey(String),
    /// Signed, time-boxed bearer token.
    Bearer(String),
}

impl Credential {
    /// Resolve a credential from the standard inbound headers, checking the
    /// static-key header first, then the bearer token.
    pub fn from_headers(api_key: Option<&str>, authorization: Option<&str>) -> Option<Self> {
        if let Some(key) = api_key {
            if !key.is_empty() {
                return Some(Self::ApiKey(key.to_string()));
            }
        }
        if let Some(auth) = authorization {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                if !token.is_empty() {
                    return Some(Self::Bearer(token.to_string()));
                }
            }
        }
        None
    }
}

/// How a caller's identity was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    ApiKey,
    Token,
}

/// A caller identity resolved from a valid credential.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    /// The authenticated agent id.
    pub agent_id: String,
    /// Which credential kind established the identity.
    pub kind: CredentialKind,
    /// Decoded claims when the credential was a token.
    pub claims: Option<TokenClaims>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_header_takes_precedence() {
        let cred = Credential::from_headers(Some("key-1"), Some("Bearer tok"));
        assert_eq!(cred, Some(Credential::ApiKey("key-1".to_string())));
    }

    #[test]
    fn test_bearer_fallback() {
        let cred = Credential::from_headers(None, Some("Bearer tok"));
        assert_eq!(cred, Some(Credential::Bearer("tok".to_string())));
    }

    #[test]
    fn test_no_credential() {
        assert_eq!(Credential::from_headers(None, None), None);
        assert_eq!(Credential::from_headers(Some(""), Some("Basic abc")), None);
    }
}
