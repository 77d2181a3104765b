use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

static PERMISSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z_]+:[a-z_]+$").unwrap());

/// A `resource:action` permission string, e.g. `"channel:write"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Permission(String);

impl Permission {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let normalized = raw.trim().to_lowercase();
        if !PERMISSION_RE.is_match(&normalized) {
            return Err(DomainError::Validation(format!(
                "invalid permission format: {raw}; must be 'resource:action'"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn resource(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    pub fn action(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_resource_and_action() {
        let perm = Permission::parse("channel:write").unwrap();
        assert_eq!(perm.resource(), "channel");
        assert_eq!(perm.action(), "write");
    }

    #[test]
    fn normalizes_case_and_rejects_missing_colon() {
        assert_eq!(Permission::parse("Channel:Write").unwrap().as_str(), "channel:write");
        assert!(Permission::parse("channelwrite").is_err());
    }
}
