use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::permission::Permission;
use crate::domain::DomainError;

/// The five per-organization system roles seeded at organization creation.
/// Display name "OwnerAdmin" is deliberately distinct from the platform
/// `SuperAdmin` role in `common_security::roles::Role`; see DESIGN.md for
/// why the two share a management rank.
pub const SYSTEM_ROLE_NAMES: [&str; 5] = ["OwnerAdmin", "ResellerAdmin", "TenantAdmin", "Agent", "ReadOnly"];

#[derive(Debug, Clone)]
pub struct Role {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub permissions: BTreeSet<Permission>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn create(
        organization_id: Uuid,
        name: String,
        description: Option<String>,
        permissions: BTreeSet<Permission>,
    ) -> Result<Self, DomainError> {
        if name.trim().is_empty() {
            return Err(DomainError::Validation("role name cannot be empty".into()));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            organization_id,
            name,
            description,
            permissions,
            is_system: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn seed_system(organization_id: Uuid, name: &str, permissions: BTreeSet<Permission>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.to_string(),
            description: None,
            permissions,
            is_system: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// System roles are immutable: name, description, and permission set
    /// may not be modified through this operation once `is_system` is set.
    pub fn update(
        &mut self,
        description: Option<String>,
        permissions: BTreeSet<Permission>,
    ) -> Result<(), DomainError> {
        if self.is_system {
            return Err(DomainError::Policy("system roles are immutable".into()));
        }
        self.description = description;
        self.permissions = permissions;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn permission_strings(&self) -> Vec<String> {
        self.permissions.iter().map(|p| p.as_str().to_string()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct UserRole {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_role_rejects_update() {
        let mut role = Role::seed_system(Uuid::new_v4(), "OwnerAdmin", BTreeSet::new());
        let err = role.update(Some("x".into()), BTreeSet::new()).unwrap_err();
        assert!(matches!(err, DomainError::Policy(_)));
    }

    #[test]
    fn custom_role_update_succeeds() {
        let mut role = Role::create(Uuid::new_v4(), "Billing".into(), None, BTreeSet::new()).unwrap();
        assert!(role.update(Some("handles billing".into()), BTreeSet::new()).is_ok());
    }
}
