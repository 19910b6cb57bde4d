//! JWT verification and per-request authentication state.
//!
//! Tokens are HS256, verified against the configured secret with the
//! `postgraphile` audience. The `role` claim selects the database role for
//! the request; requests without a token run as the default role, and
//! requests with an unverifiable token are rejected outright.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

/// Audience expected on inbound tokens.
const AUDIENCE: &str = "postgraphile";

/// Authentication outcome attached to each GraphQL request.
#[derive(Debug, Clone)]
pub struct AuthSession {
    /// Database role to assume, when one is configured or claimed.
    pub role: Option<String>,
    /// Verified claims, exported to SQL as the `jwt.claims` setting.
    pub claims: Option<serde_json::Value>,
}

impl AuthSession {
    /// Unauthenticated session running as the default role.
    pub fn anonymous(default_role: Option<&str>) -> Self {
        Self {
            role: default_role.map(str::to_string),
            claims: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("malformed Authorization header")]
    MalformedHeader,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

/// Resolves the authentication session for a request.
///
/// With no `Authorization` header the session is anonymous. With a header
/// but no configured secret, tokens cannot be verified and are ignored.
pub fn authenticate(
    authorization: Option<&str>,
    secret: Option<&str>,
    default_role: Option<&str>,
) -> Result<AuthSession, AuthError> {
    let header = match authorization {
        Some(h) => h,
        None => return Ok(AuthSession::anonymous(default_role)),
    };
    let secret = match secret {
        Some(s) => s,
        None => return Ok(AuthSession::anonymous(default_role)),
    };

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::MalformedHeader)?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[AUDIENCE]);

    let data = decode::<serde_json::Value>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;

    let role = data
        .claims
        .get("role")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .or_else(|| default_role.map(str::to_string));

    Ok(AuthSession {
        role,
        claims: Some(data.claims),
    })
}
