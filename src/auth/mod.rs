//! Identity Resolver: bearer credential in, `(user_id, role)` out.

pub mod jwt;
pub mod middleware;

use serde::{Deserialize, Serialize};

use crate::db::models::Role;
use crate::error::{ChatError, ChatResult};

/// Resolved identity attached to a connection or request for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> ChatResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ChatError::Forbidden("administrator role required"))
        }
    }
}

/// Validate a presented credential. An optional `Bearer` scheme prefix is stripped.
/// Missing or blank credentials are `AuthenticationRequired`; anything that fails
/// verification is `AuthenticationInvalid`.
pub fn resolve_identity(secret: &[u8], credential: Option<&str>) -> ChatResult<Identity> {
    let raw = credential.map(str::trim).unwrap_or_default();
    let token = strip_scheme(raw).trim();
    if token.is_empty() {
        return Err(ChatError::AuthenticationRequired);
    }

    let claims = jwt::validate_access_token(secret, token).map_err(|e| {
        tracing::debug!(error = %e, "Access token rejected");
        ChatError::AuthenticationInvalid
    })?;

    Ok(Identity {
        user_id: claims.sub,
        role: claims.role,
    })
}

fn strip_scheme(raw: &str) -> &str {
    match raw.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest,
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_resolves_with_and_without_scheme() {
        let token = jwt::issue_access_token(SECRET, "psy-1", Role::Psychologist, 60).unwrap();

        let plain = resolve_identity(SECRET, Some(&token)).unwrap();
        assert_eq!(plain.user_id, "psy-1");
        assert_eq!(plain.role, Role::Psychologist);

        let prefixed = resolve_identity(SECRET, Some(&format!("Bearer {}", token))).unwrap();
        assert_eq!(prefixed, plain);

        let lowercase = resolve_identity(SECRET, Some(&format!("bearer {}", token))).unwrap();
        assert_eq!(lowercase, plain);
    }

    #[test]
    fn test_missing_credential_is_required_error() {
        assert!(matches!(
            resolve_identity(SECRET, None),
            Err(ChatError::AuthenticationRequired)
        ));
        assert!(matches!(
            resolve_identity(SECRET, Some("Bearer   ")),
            Err(ChatError::AuthenticationRequired)
        ));
    }

    #[test]
    fn test_bad_credentials_are_invalid() {
        assert!(matches!(
            resolve_identity(SECRET, Some("not-a-jwt")),
            Err(ChatError::AuthenticationInvalid)
        ));

        let other = jwt::issue_access_token(b"another-secret-another-secret-xx", "u", Role::Admin, 60)
            .unwrap();
        assert!(matches!(
            resolve_identity(SECRET, Some(&other)),
            Err(ChatError::AuthenticationInvalid)
        ));

        // Expired beyond the validation leeway
        let expired = jwt::issue_access_token(SECRET, "u", Role::Patient, -600).unwrap();
        assert!(matches!(
            resolve_identity(SECRET, Some(&expired)),
            Err(ChatError::AuthenticationInvalid)
        ));
    }
}
