//! Token authentication for connection upgrades.
//!
//! Tokens are HS256 JWTs carrying the user id in a `userId` claim. They are
//! read from the `Authorization: Bearer <token>` header or, for browser
//! clients that cannot set headers on a WebSocket, from the `token` query
//! parameter.

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Authenticated user.
    pub user_id: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

/// Rejection returned when a token is missing or invalid.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token in the header or query.
    #[error("No token provided, authorization denied.")]
    MissingToken,

    /// Token failed signature or expiry checks.
    #[error("Token is not valid")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "message": self.to_string() });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Verifies access tokens against a shared secret.
#[derive(Clone)]
pub struct Authenticator {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl Authenticator {
    /// Create an authenticator for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Validate a token and return its claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] if the signature or expiry is wrong.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(?e, "Token validation failed");
                AuthError::InvalidToken(e)
            })
    }

    /// Sign a token for `claims`.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn issue(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }

    /// Authenticate a request from its headers, falling back to a query token.
    ///
    /// # Errors
    ///
    /// Returns an error if no token is present or it does not verify.
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<Claims, AuthError> {
        let token = bearer_token(headers)
            .or(query_token)
            .ok_or(AuthError::MissingToken)?;
        self.verify(token)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
