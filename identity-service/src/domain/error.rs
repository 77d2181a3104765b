use thiserror::Error;

/// Business-rule violations raised while constructing or mutating an
/// aggregate. Handlers translate these into `common_http_errors::ApiError`;
/// nothing in `domain` knows about HTTP.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("policy violation: {0}")]
    Policy(String),
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
    #[error("internal error: {0}")]
    Internal(String),
}
