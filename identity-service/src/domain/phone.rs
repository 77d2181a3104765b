use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

static E164_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+[1-9]\d{1,14}$").unwrap());

/// E.164-formatted phone number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phone(String);

impl Phone {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let mut value = raw.trim().to_string();
        if value.is_empty() {
            return Err(DomainError::Validation("phone cannot be empty".into()));
        }
        if !value.starts_with('+') {
            value = format!("+{value}");
        }
        if !E164_RE.is_match(&value) {
            return Err(DomainError::Validation(format!(
                "phone must be in E.164 format: {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Phone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_leading_plus_when_missing() {
        assert_eq!(Phone::parse("15551234567").unwrap().as_str(), "+15551234567");
    }

    #[test]
    fn rejects_non_e164_values() {
        assert!(Phone::parse("+0155512345").is_err());
        assert!(Phone::parse("not-a-phone").is_err());
    }
}
