use axum::{extract::FromRequestParts, http::request::Parts};

use crate::auth::{resolve_identity, Identity};
use crate::error::ChatError;

/// Identity extracted from `Authorization: Bearer <jwt>`.
/// Implements axum's FromRequestParts for use as an extractor.
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        // Get JWT secret from request extensions (set by middleware layer)
        let jwt_secret = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or_else(|| ChatError::Internal("JWT secret missing from extensions".into()))?;

        resolve_identity(&jwt_secret.0, header)
    }
}

/// JWT secret stored in request extensions for the Identity extractor
#[derive(Clone)]
pub struct JwtSecret(pub Vec<u8>);
