//! Access token issuance and validation.
//!
//! Tokens are compact HMAC-SHA256-signed payloads with a fixed validity
//! window. Issued tokens are tracked in an active-token table; validation
//! rejects anything not present there, and purges entries found expired.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Default token validity window: 1 hour.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Claims carried by a signed access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject agent id.
    pub sub: String,
    /// Granted scope.
    pub scope: String,
    /// Issued-at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
    /// Unique token id.
    pub jti: String,
}

impl TokenClaims {
    /// Whether the token is expired at the current time.
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

/// A freshly issued token together with its decoded claims.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedToken {
    /// The encoded bearer token.
    pub token: String,
    /// The claims it carries.
    pub claims: TokenClaims,
}

/// Reasons a token fails validation. Internal detail only; callers surface
/// a generic denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    NotActive,
    Expired,
    UnknownClient,
    BadSecret,
}

/// Issues and validates signed access tokens for registered clients.
pub struct TokenManager {
    secret: Vec<u8>,
    ttl_secs: i64,
    /// client_id -> shared secret
    clients: Mutex<HashMap<String, String>>,
    /// encoded token -> claims
    active: Mutex<HashMap<String, TokenClaims>>,
}

impl TokenManager {
    /// Create a manager signing with `secret` and the default 1h validity.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self::with_ttl(secret, DEFAULT_TOKEN_TTL_SECS)
    }

    /// Create a manager with an explicit validity window in seconds.
    pub fn with_ttl(secret: impl Into<Vec<u8>>, ttl_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl_secs,
            clients: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Register a client's shared secret for later authentication.
    pub fn register_client(&self, client_id: impl Into<String>, secret: impl Into<String>) {
        let client_id = client_id.into();
        log::info!("Token client registered: {}", client_id);
        self.clients.lock().insert(client_id, secret.into());
    }

    /// Verify a client's shared secret using constant-time comparison and
    /// mint a signed token on success.
    pub fn authenticate(&self, client_id: &str, secret: &str) -> Result<IssuedToken, TokenError> {
        let stored = {
            let clients = self.clients.lock();
            clients.get(client_id).cloned()
        };
        let stored = stored.ok_or(TokenError::UnknownClient)?;
        if !constant_time_eq(stored.as_bytes(), secret.as_bytes()) {
            return Err(TokenError::BadSecret);
        }
        Ok(self.issue(client_id, "agent:skills"))
    }

    /// Mint a signed token for `subject` with the given scope.
    pub fn issue(&self, subject: &str, scope: &str) -> IssuedToken {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: subject.to_string(),
            scope: scope.to_string(),
            iat: now,
            exp: now + self.ttl_secs,
            jti: Uuid::new_v4().simple().to_string(),
        };
        let token = self.encode(&claims);
        self.active.lock().insert(token.clone(), claims.clone());
        log::info!("Access token issued for: {}", subject);
        IssuedToken { token, claims }
    }

    /// Validate an encoded token: verify the signature, then require the
    /// token to be present and unexpired in the active table. Expired
    /// entries are purged as a side effect.
    pub fn validate(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let claims = self.decode(token)?;

        let mut active = self.active.lock();
        match active.get(token) {
            None => {
                log::warn!("Token not found in active table");
                Err(TokenError::NotActive)
            }
            Some(_) if claims.is_expired() => {
                log::warn!("Expired token purged for: {}", claims.sub);
                active.remove(token);
                Err(TokenError::Expired)
            }
            Some(_) => Ok(claims),
        }
    }

    /// Explicitly revoke a token, removing it from the active table.
    pub fn revoke(&self, token: &str) {
        if self.active.lock().remove(token).is_some() {
            log::info!("Token revoked");
        }
    }

    /// Number of tokens currently in the active table.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    fn encode(&self, claims: &TokenClaims) -> String {
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(claims).expect("claims serialize"),
        );
        let sig = self.sign(payload.as_bytes());
        format!("{}.{}", payload, URL_SAFE_NO_PAD.encode(sig))
    }

    fn decode(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let (payload, sig) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let sig = URL_SAFE_NO_PAD.decode(sig).map_err(|_| TokenError::Malformed)?;
        let expected = self.sign(payload.as_bytes());
        if !constant_time_eq(&expected, &sig) {
            return Err(TokenError::BadSignature);
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key size");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Constant-time byte comparison to prevent timing attacks on secrets.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TokenManager {
        TokenManager::new("test-secret")
    }

    #[test]
    fn test_issue_and_validate() {
        let mgr = manager();
        let issued = mgr.issue("orchestrator", "agent:skills");
        let claims = mgr.validate(&issued.token).unwrap();
        assert_eq!(claims.sub, "orchestrator");
        assert_eq!(claims, issued.claims);
    }

    #[test]
    fn test_authenticate_requires_registered_secret() {
        let mgr = manager();
        mgr.register_client("menu", "s3cret");
        assert!(mgr.authenticate("menu", "s3cret").is_ok());
        assert_eq!(mgr.authenticate("menu", "wrong"), Err(TokenError::BadSecret));
        assert_eq!(
            mgr.authenticate("ghost", "s3cret"),
            Err(TokenError::UnknownClient)
        );
    }

    #[test]
    fn test_well_formed_but_inactive_token_rejected() {
        let a = manager();
        let b = TokenManager::new("test-secret");
        let issued = a.issue("menu", "agent:skills");
        // Same secret, valid signature, but never issued by `b`.
        assert_eq!(b.validate(&issued.token), Err(TokenError::NotActive));
    }

    #[test]
    fn test_expired_token_rejected_and_purged() {
        let mgr = TokenManager::with_ttl("test-secret", -10);
        let issued = mgr.issue("menu", "agent:skills");
        assert_eq!(mgr.active_count(), 1);
        assert_eq!(mgr.validate(&issued.token), Err(TokenError::Expired));
        assert_eq!(mgr.active_count(), 0);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let mgr = manager();
        let issued = mgr.issue("menu", "agent:skills");
        let mut tampered = issued.token.clone();
        tampered.push('x');
        assert!(matches!(
            mgr.validate(&tampered),
            Err(TokenError::BadSignature) | Err(TokenError::Malformed)
        ));
    }

    #[test]
    fn test_revoke_removes_from_active_table() {
        let mgr = manager();
        let issued = mgr.issue("menu", "agent:skills");
        mgr.revoke(&issued.token);
        assert_eq!(mgr.validate(&issued.token), Err(TokenError::NotActive));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
