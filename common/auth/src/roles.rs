pub const ROLE_SUPER_ADMIN: &str = "super_admin";
pub const ROLE_RESELLER_ADMIN: &str = "reseller_admin";
pub const ROLE_TENANT_ADMIN: &str = "tenant_admin";
pub const ROLE_AGENT: &str = "agent";
pub const ROLE_READ_ONLY: &str = "read_only";

pub const ROLE_HIERARCHY: &[&str] = &[
    ROLE_SUPER_ADMIN,
    ROLE_RESELLER_ADMIN,
    ROLE_TENANT_ADMIN,
    ROLE_AGENT,
    ROLE_READ_ONLY,
];
