use crate::context::SecurityContext;
use crate::SecurityError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Platform/tenant role. `SuperAdmin` is platform-scoped and crosses tenant
/// boundaries; the remaining variants are tenant-scoped system roles seeded
/// for every organization at creation (the seeded display name for the top
/// tenant-scoped rank is "OwnerAdmin", mapped here onto `SuperAdmin` since
/// the two share the same management rank within a tenant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    SuperAdmin,
    ResellerAdmin,
    TenantAdmin,
    Agent,
    ReadOnly,
    Unknown(String),
}

impl Role {
    pub fn parse_role(s: &str) -> Self {
        match s {
            "super_admin" | "SuperAdmin" | "owner_admin" | "OwnerAdmin" => Role::SuperAdmin,
            "reseller_admin" | "ResellerAdmin" => Role::ResellerAdmin,
            "tenant_admin" | "TenantAdmin" => Role::TenantAdmin,
            "agent" | "Agent" => Role::Agent,
            "read_only" | "ReadOnly" => Role::ReadOnly,
            other => Role::Unknown(other.to_string()),
        }
    }

    /// Rank used for "can A manage B" decisions: higher outranks lower.
    /// `Unknown` roles never manage anyone and are never manageable by rank
    /// comparison alone.
    pub fn rank(&self) -> Option<u8> {
        match self {
            Role::SuperAdmin => Some(4),
            Role::ResellerAdmin => Some(3),
            Role::TenantAdmin => Some(2),
            Role::Agent => Some(1),
            Role::ReadOnly => Some(0),
            Role::Unknown(_) => None,
        }
    }

    /// Whether `self` may manage a user holding `other` within the same
    /// tenant. `SuperAdmin` additionally crosses tenant boundaries; callers
    /// must check that separately via the session's admin-scope flag.
    pub fn outranks(&self, other: &Role) -> bool {
        matches!((self.rank(), other.rank()), (Some(a), Some(b)) if a > b)
    }
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Role::parse_role(s))
    }
}

pub fn ensure_role(ctx: &SecurityContext, required: Role) -> Result<(), SecurityError> {
    if ctx.roles.contains(&required) {
        return Ok(());
    }
    warn!(tenant_id = %ctx.tenant_id, ?required, roles = ?ctx.roles, "role_check_failed");
    Err(SecurityError::Forbidden)
}

pub fn ensure_any_role(ctx: &SecurityContext, required: &[Role]) -> Result<(), SecurityError> {
    if ctx.roles.iter().any(|r| required.iter().any(|x| x == r)) {
        return Ok(());
    }
    warn!(tenant_id = %ctx.tenant_id, ?required, roles = ?ctx.roles, "any_role_check_failed");
    Err(SecurityError::Forbidden)
}

/// The highest-ranked role a user holds, if any are recognized system
/// roles. Used for management-hierarchy decisions.
pub fn highest_rank(roles: &[Role]) -> Option<u8> {
    roles.iter().filter_map(Role::rank).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_admin_alias_maps_to_super_admin() {
        assert_eq!(Role::parse_role("OwnerAdmin"), Role::SuperAdmin);
        assert_eq!(Role::parse_role("owner_admin"), Role::SuperAdmin);
    }

    #[test]
    fn hierarchy_respects_strict_ordering() {
        assert!(Role::SuperAdmin.outranks(&Role::ResellerAdmin));
        assert!(Role::ResellerAdmin.outranks(&Role::TenantAdmin));
        assert!(Role::TenantAdmin.outranks(&Role::Agent));
        assert!(Role::Agent.outranks(&Role::ReadOnly));
        assert!(!Role::ReadOnly.outranks(&Role::Agent));
        assert!(!Role::TenantAdmin.outranks(&Role::TenantAdmin));
    }

    #[test]
    fn unknown_role_never_outranks() {
        let unknown = Role::Unknown("custom".into());
        assert!(!unknown.outranks(&Role::ReadOnly));
        assert!(!Role::SuperAdmin.outranks(&unknown));
    }
}
