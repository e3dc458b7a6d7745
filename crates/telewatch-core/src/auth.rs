// ── Subscriber token verification ──
//
// Resolves the owner identity behind a token presented on `subscribe`.
// Verification failures never fail the subscription itself; the session
// only skips the owner room.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::OwnerId;

/// Claim names that may carry the owner id, in lookup order.
const OWNER_CLAIMS: [&str; 4] = ["userId", "id", "_id", "sub"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token carries no owner identity")]
    MissingSubject,

    #[error("token verification is not configured")]
    NotConfigured,
}

/// Resolves a bearer token to the owner it was issued for.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<OwnerId, AuthError>;
}

// ── JwtVerifier ─────────────────────────────────────────────────────

/// HS256 JWT verification against a shared secret.
///
/// `exp` and `nbf` are enforced when present but not required. The owner id
/// is read from the first of `userId`, `id`, `_id`, `sub` that is set.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &SecretString) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims::<&str>(&[]);
        validation.validate_nbf = true;

        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<OwnerId, AuthError> {
        let token = token.trim();
        let token = token
            .strip_prefix("Bearer ")
            .or_else(|| token.strip_prefix("bearer "))
            .unwrap_or(token);

        let data = decode::<Map<String, Value>>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        owner_from_claims(&data.claims).ok_or(AuthError::MissingSubject)
    }
}

fn owner_from_claims(claims: &Map<String, Value>) -> Option<OwnerId> {
    OWNER_CLAIMS.iter().find_map(|name| match claims.get(*name)? {
        Value::String(s) if !s.trim().is_empty() => Some(OwnerId::new(s.as_str())),
        Value::Number(n) => Some(OwnerId::new(n.to_string())),
        _ => None,
    })
}

// ── DisabledVerifier ────────────────────────────────────────────────

/// Used when no signing secret is configured: every token is unverifiable,
/// so sessions stay gateway-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledVerifier;

impl TokenVerifier for DisabledVerifier {
    fn verify(&self, _token: &str) -> Result<OwnerId, AuthError> {
        Err(AuthError::NotConfigured)
    }
}
