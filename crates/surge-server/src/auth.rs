//! Bearer-token authorization for the upgrade endpoint.
//!
//! Tokens are JWTs signed with HS256 and a shared secret. Expiry and
//! not-before are checked when present; no claims are required. Rejected
//! requests never reach the WebSocket upgrade.

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::sync::Arc;
use tracing::{debug, warn};

/// Content type of the 401 response.
pub const UNAUTHORIZED_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// HS256 token verifier.
pub struct JwtAuth {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    /// Create a verifier for a shared secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_aud = false;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a token's signature, algorithm and time claims.
    ///
    /// # Errors
    ///
    /// Returns the verification error for any rejected token.
    pub fn verify(&self, token: &str) -> Result<(), jsonwebtoken::errors::Error> {
        decode::<serde_json::Value>(token, &self.key, &self.validation).map(|_| ())
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// The 401 response sent for missing or invalid tokens.
#[must_use]
pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(CONTENT_TYPE, UNAUTHORIZED_CONTENT_TYPE)],
        r#"{"error":"unauthorized"}"#,
    )
        .into_response()
}

/// Middleware admitting only requests with a valid bearer token.
pub async fn require_bearer(
    State(auth): State<Arc<JwtAuth>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        debug!(uri = %request.uri(), "Missing bearer token");
        return unauthorized();
    };

    match auth.verify(token) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            warn!(uri = %request.uri(), error = %e, "Rejected bearer token");
            unauthorized()
        }
    }
}
