//! Account tokens and password hashing.
//!
//! Tokens are HS256 JWTs signed with `JWT_SECRET_KEY`. Every instance of the
//! service must share the secret; without one a random per-process secret is
//! generated and tokens do not survive a restart.
//!
//! Logout revokes a token by its `jti`. Revocations live in memory for as
//! long as a token can be valid, so they are per-process as well.

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

const ISSUER: &str = "neuroscan";

// ============================================================================
// Claims
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaims {
    /// User id
    pub sub: String,
    pub username: String,
    pub email: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    /// Unique token id, used for revocation
    pub jti: String,
}

impl UserClaims {
    pub fn user_id(&self) -> Option<i32> {
        self.sub.parse().ok()
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum AuthError {
    EncodingError(String),
    DecodingError(String),
    Revoked,
    HashingError(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::EncodingError(msg) => write!(f, "Failed to encode JWT: {}", msg),
            AuthError::DecodingError(msg) => write!(f, "Invalid or expired token: {}", msg),
            AuthError::Revoked => write!(f, "Token has been revoked"),
            AuthError::HashingError(msg) => write!(f, "Password hashing failed: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

// ============================================================================
// Token Service
// ============================================================================

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_seconds: i64,
    revoked: moka::sync::Cache<String, ()>,
}

impl TokenService {
    pub fn new(secret: &[u8], ttl_hours: i64) -> Self {
        let ttl_seconds = ttl_hours.max(1) * 60 * 60;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl_seconds,
            revoked: moka::sync::Cache::builder()
                .max_capacity(100_000)
                .time_to_live(Duration::from_secs(ttl_seconds as u64))
                .build(),
        }
    }

    /// Uses `secret` when given, otherwise a random one for this process only.
    pub fn from_secret(secret: Option<&str>, ttl_hours: i64) -> Self {
        match secret {
            Some(secret) => Self::new(secret.as_bytes(), ttl_hours),
            None => {
                tracing::warn!(
                    "JWT_SECRET_KEY not set. Using a random secret; issued tokens will not survive a restart."
                );
                let secret = format!("{}{}", uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
                Self::new(secret.as_bytes(), ttl_hours)
            }
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    pub fn issue(
        &self,
        user_id: i32,
        username: &str,
        email: &str,
    ) -> Result<(String, UserClaims), AuthError> {
        let iat = chrono::Utc::now().timestamp();
        let claims = UserClaims {
            sub: user_id.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            iss: ISSUER.to_string(),
            iat,
            exp: iat + self.ttl_seconds,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let token = self.sign(&claims)?;
        Ok((token, claims))
    }

    fn sign(&self, claims: &UserClaims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::EncodingError(e.to_string()))
    }

    /// Validates signature, issuer and expiry, then checks revocation.
    pub fn verify(&self, token: &str) -> Result<UserClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);

        let claims = decode::<UserClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| AuthError::DecodingError(e.to_string()))?
            .claims;

        if self.revoked.contains_key(&claims.jti) {
            return Err(AuthError::Revoked);
        }
        Ok(claims)
    }

    pub fn revoke(&self, claims: &UserClaims) {
        self.revoked.insert(claims.jti.clone(), ());
    }
}

// ============================================================================
// Passwords
// ============================================================================

pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost).map_err(|e| AuthError::HashingError(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, hash).map_err(|e| AuthError::HashingError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_roundtrip() {
        let service = TokenService::new(b"test-secret", 24);
        let (token, claims) = service.issue(42, "alice", "alice@example.com").unwrap();
        assert_eq!(claims.exp - claims.iat, 24 * 3600);

        let decoded = service.verify(&token).unwrap();
        assert_eq!(decoded, claims);
        assert_eq!(decoded.user_id(), Some(42));
    }

    #[test]
    fn rejects_foreign_and_tampered_tokens() {
        let ours = TokenService::new(b"one", 1);
        let theirs = TokenService::new(b"two", 1);
        let (token, _) = theirs.issue(1, "bob", "bob@example.com").unwrap();
        assert!(matches!(ours.verify(&token), Err(AuthError::DecodingError(_))));
        assert!(ours.verify("not.a.jwt").is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let service = TokenService::new(b"secret", 1);
        let now = chrono::Utc::now().timestamp();
        let claims = UserClaims {
            sub: "1".into(),
            username: "carol".into(),
            email: "carol@example.com".into(),
            iss: ISSUER.into(),
            iat: now - 7200,
            exp: now - 3600,
            jti: "old".into(),
        };
        let token = service.sign(&claims).unwrap();
        assert!(matches!(service.verify(&token), Err(AuthError::DecodingError(_))));
    }

    #[test]
    fn revoked_tokens_fail() {
        let service = TokenService::new(b"secret", 1);
        let (token, claims) = service.issue(3, "dave", "dave@example.com").unwrap();
        service.revoke(&claims);
        assert!(matches!(service.verify(&token), Err(AuthError::Revoked)));

        let (fresh, _) = service.issue(3, "dave", "dave@example.com").unwrap();
        assert!(service.verify(&fresh).is_ok());
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("hunter22", 4).unwrap();
        assert_ne!(hash, "hunter22");
        assert!(verify_password("hunter22", &hash).unwrap());
        assert!(!verify_password("hunter23", &hash).unwrap());
    }
}
