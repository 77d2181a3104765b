use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Uuid>,
}

/// Uniform API error taxonomy. Variant names mirror the machine `code`
/// returned in the error envelope; `into_response` is the single place that
/// maps a variant to its HTTP status.
#[derive(Debug)]
pub enum ApiError {
    InvalidCredentials { trace_id: Option<Uuid> },
    AccountLocked { locked_until: Option<chrono::DateTime<chrono::Utc>>, trace_id: Option<Uuid> },
    Unauthorized { message: Option<String>, trace_id: Option<Uuid> },
    Forbidden { trace_id: Option<Uuid> },
    ForbiddenMissingRole { role: &'static str, trace_id: Option<Uuid> },
    PermissionDenied { trace_id: Option<Uuid> },
    NotFound { code: &'static str, trace_id: Option<Uuid> },
    Conflict { code: &'static str, message: Option<String>, trace_id: Option<Uuid> },
    TokenExpired { trace_id: Option<Uuid> },
    TokenRevoked { trace_id: Option<Uuid> },
    TokenAlreadyUsed { trace_id: Option<Uuid> },
    ApiKeyExpired { trace_id: Option<Uuid> },
    ApiKeyRevoked { trace_id: Option<Uuid> },
    ValidationError { details: Value, trace_id: Option<Uuid> },
    BadRequest { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    RateLimited { retry_after_secs: Option<u64>, trace_id: Option<Uuid> },
    TenantContextMissing { trace_id: Option<Uuid> },
    ProviderError { message: Option<String>, trace_id: Option<Uuid> },
    Internal { trace_id: Option<Uuid>, message: Option<String> },
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(e: E, trace_id: Option<Uuid>) -> Self {
        Self::Internal {
            trace_id,
            message: Some(e.to_string()),
        }
    }

    pub fn bad_request(code: &'static str, trace_id: Option<Uuid>) -> Self {
        Self::BadRequest {
            code,
            trace_id,
            message: None,
        }
    }

    pub fn validation(details: Value, trace_id: Option<Uuid>) -> Self {
        Self::ValidationError { details, trace_id }
    }
}

impl From<common_db::RepoError> for ApiError {
    fn from(err: common_db::RepoError) -> Self {
        match err {
            common_db::RepoError::NotFound => ApiError::NotFound {
                code: "not_found",
                trace_id: None,
            },
            common_db::RepoError::Conflict => ApiError::Conflict {
                code: "conflict",
                message: None,
                trace_id: None,
            },
            common_db::RepoError::TenantContextMissing => {
                ApiError::TenantContextMissing { trace_id: None }
            }
            common_db::RepoError::Storage(msg) => ApiError::Internal {
                trace_id: None,
                message: Some(msg),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details, trace_id) = match self {
            ApiError::InvalidCredentials { trace_id } => (
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "invalid email or password".to_string(),
                Value::Null,
                trace_id,
            ),
            ApiError::AccountLocked { locked_until, trace_id } => (
                StatusCode::FORBIDDEN,
                "account_locked",
                "account is temporarily locked".to_string(),
                locked_until
                    .map(|t| serde_json::json!({ "locked_until": t }))
                    .unwrap_or(Value::Null),
                trace_id,
            ),
            ApiError::Unauthorized { message, trace_id } => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                message.unwrap_or_else(|| "unauthorized".to_string()),
                Value::Null,
                trace_id,
            ),
            ApiError::Forbidden { trace_id } => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "forbidden".to_string(),
                Value::Null,
                trace_id,
            ),
            ApiError::ForbiddenMissingRole { role, trace_id } => (
                StatusCode::FORBIDDEN,
                "forbidden",
                format!("missing required role: {role}"),
                serde_json::json!({ "missing_role": role }),
                trace_id,
            ),
            ApiError::PermissionDenied { trace_id } => (
                StatusCode::FORBIDDEN,
                "permission_denied",
                "permission denied".to_string(),
                Value::Null,
                trace_id,
            ),
            ApiError::NotFound { code, trace_id } => (
                StatusCode::NOT_FOUND,
                code,
                "resource not found".to_string(),
                Value::Null,
                trace_id,
            ),
            ApiError::Conflict { code, message, trace_id } => (
                StatusCode::CONFLICT,
                code,
                message.unwrap_or_else(|| "conflict".to_string()),
                Value::Null,
                trace_id,
            ),
            ApiError::TokenExpired { trace_id } => (
                StatusCode::UNAUTHORIZED,
                "token_expired",
                "token has expired".to_string(),
                Value::Null,
                trace_id,
            ),
            ApiError::TokenRevoked { trace_id } => (
                StatusCode::UNAUTHORIZED,
                "token_revoked",
                "token has been revoked".to_string(),
                Value::Null,
                trace_id,
            ),
            ApiError::TokenAlreadyUsed { trace_id } => (
                StatusCode::UNAUTHORIZED,
                "token_already_used",
                "token has already been used".to_string(),
                Value::Null,
                trace_id,
            ),
            ApiError::ApiKeyExpired { trace_id } => (
                StatusCode::UNAUTHORIZED,
                "api_key_expired",
                "api key has expired".to_string(),
                Value::Null,
                trace_id,
            ),
            ApiError::ApiKeyRevoked { trace_id } => (
                StatusCode::UNAUTHORIZED,
                "api_key_revoked",
                "api key has been revoked".to_string(),
                Value::Null,
                trace_id,
            ),
            ApiError::ValidationError { details, trace_id } => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                "request failed validation".to_string(),
                details,
                trace_id,
            ),
            ApiError::BadRequest { code, trace_id, message } => (
                StatusCode::BAD_REQUEST,
                code,
                message.unwrap_or_else(|| "bad request".to_string()),
                Value::Null,
                trace_id,
            ),
            ApiError::RateLimited { retry_after_secs, trace_id } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "rate limit exceeded".to_string(),
                retry_after_secs
                    .map(|s| serde_json::json!({ "retry_after_secs": s }))
                    .unwrap_or(Value::Null),
                trace_id,
            ),
            ApiError::TenantContextMissing { trace_id } => (
                StatusCode::BAD_REQUEST,
                "tenant_context_missing",
                "tenant context is required".to_string(),
                Value::Null,
                trace_id,
            ),
            ApiError::ProviderError { message, trace_id } => (
                StatusCode::BAD_GATEWAY,
                "provider_error",
                message.unwrap_or_else(|| "upstream provider error".to_string()),
                Value::Null,
                trace_id,
            ),
            ApiError::Internal { trace_id, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                message.unwrap_or_else(|| "internal error".to_string()),
                Value::Null,
                trace_id,
            ),
        };

        let mut resp = (
            status,
            Json(ErrorBody {
                code: code.to_string(),
                message,
                details,
                trace_id,
            }),
        )
            .into_response();
        if let Ok(val) = HeaderValue::from_str(code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
