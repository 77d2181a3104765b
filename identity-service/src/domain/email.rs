use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());

/// Normalized, validated email address. Always lower-cased; the raw string
/// is never logged directly (callers should log `Email` only via its
/// `Display`, which is the normalized value itself — redaction lives at the
/// audit/log layer, not here).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Email(String);

impl Email {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(DomainError::Validation("email cannot be empty".into()));
        }
        if normalized.len() > 254 {
            return Err(DomainError::Validation("email address too long".into()));
        }
        if !EMAIL_RE.is_match(&normalized) {
            return Err(DomainError::Validation(format!(
                "invalid email format: {normalized}"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn domain(&self) -> &str {
        self.0.split('@').nth(1).unwrap_or_default()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        let email = Email::parse("  Alice@Example.COM ").unwrap();
        assert_eq!(email.as_str(), "alice@example.com");
    }

    #[test]
    fn rejects_malformed_address() {
        assert!(Email::parse("not-an-email").is_err());
    }

    #[test]
    fn domain_extracts_host_part() {
        let email = Email::parse("bob@acme.io").unwrap();
        assert_eq!(email.domain(), "acme.io");
    }
}
