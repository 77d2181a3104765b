pub mod api_key;
pub mod auth;
pub mod mfa;
pub mod organization;
pub mod role;

use common_audit::AuditActor;
use common_auth::{AuthContext, Claims};
use common_http_errors::ApiError;
use uuid::Uuid;

/// Rejects unless the caller holds at least one of `roles`, comparing
/// against the JWT's own role claims rather than `common_security`'s
/// header-trust extractor: this service is the token issuer, not a
/// gateway-fronted consumer of someone else's verification.
pub(crate) fn ensure_role_any(auth: &AuthContext, roles: &[&str]) -> Result<(), ApiError> {
    if roles.iter().any(|role| auth.has_role(role)) {
        Ok(())
    } else {
        Err(ApiError::Forbidden { trace_id: None })
    }
}

/// Platform `super_admin` tokens cross tenant boundaries; everyone else is
/// confined to the organization named in their own claims.
pub(crate) fn ensure_tenant_access(auth: &AuthContext, organization_id: Uuid) -> Result<(), ApiError> {
    if auth.has_role("super_admin") || auth.claims.tenant_id == organization_id {
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
