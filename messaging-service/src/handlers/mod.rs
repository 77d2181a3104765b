pub mod channel;
pub mod message;
pub mod template;
pub mod webhook;

use common_audit::AuditActor;
use common_auth::{AuthContext, Claims};
use common_http_errors::ApiError;
use uuid::Uuid;

/// Rejects unless the caller holds at least one of `roles`, comparing
/// against the JWT's own role claims issued by identity-service.
pub(crate) fn ensure_role_any(auth: &AuthContext, roles: &[&str]) -> Result<(), ApiError> {
    if roles.iter().any(|role| auth.has_role(role)) {
        Ok(())
    } else {
        Err(ApiError::Forbidden { trace_id: None })
    }
}

pub(crate) fn actor_from_claims(claims: &Claims) -> AuditActor {
    AuditActor {
        id: Some(claims.subject),
        name: None,
        email: claims.email.clone(),
    }
}

pub(crate) fn trace_id_from_headers(headers: &axum::http::HeaderMap) -> Option<Uuid> {
    headers
        .get("X-Trace-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
}
