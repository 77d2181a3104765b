use crate::{roles::Role, SecurityContext, SecurityError};

/// Coarse-grained capability for middleware-level gating, separate from the
/// fine-grained `resource:action` permission strings stored on a `Role` row
/// (those are compared by the identity service itself, since they are
/// dynamic per-organization data rather than a closed set known at compile
/// time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    OrganizationManage,
    UserManage,
    RoleManage,
    ApiKeyManage,
    ChannelManage,
    TemplateManage,
    MessageSend,
    AuditView,
}

fn allowed_roles(cap: Capability) -> &'static [Role] {
    use Capability::*;
    use Role::*;
    match cap {
        OrganizationManage => &[SuperAdmin, ResellerAdmin],
        UserManage => &[SuperAdmin, ResellerAdmin, TenantAdmin],
        RoleManage => &[SuperAdmin, ResellerAdmin, TenantAdmin],
        ApiKeyManage => &[SuperAdmin, ResellerAdmin, TenantAdmin],
        ChannelManage => &[SuperAdmin, ResellerAdmin, TenantAdmin],
        TemplateManage => &[SuperAdmin, ResellerAdmin, TenantAdmin, Agent],
        MessageSend => &[SuperAdmin, ResellerAdmin, TenantAdmin, Agent],
        AuditView => &[SuperAdmin, ResellerAdmin, TenantAdmin],
    }
}

pub fn ensure_capability(ctx: &SecurityContext, cap: Capability) -> Result<(), SecurityError> {
    let allowed = allowed_roles(cap);
    if ctx.roles.iter().any(|r| allowed.iter().any(|a| a == r)) {
        return Ok(());
    }
    Err(SecurityError::Forbidden)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_audit::AuditActor;
    use uuid::Uuid;

    fn mk_ctx(roles: Vec<Role>) -> SecurityContext {
        SecurityContext {
            tenant_id: Uuid::new_v4(),
            actor: AuditActor {
                id: Some(Uuid::new_v4()),
                name: None,
                email: None,
            },
            roles,
            trace_id: None,
        }
    }

    #[test]
    fn read_only_cannot_send_messages() {
        let ctx = mk_ctx(vec![Role::ReadOnly]);
        assert!(ensure_capability(&ctx, Capability::MessageSend).is_err());
    }

    #[test]
    fn agent_can_send_messages_but_not_manage_users() {
        let ctx = mk_ctx(vec![Role::Agent]);
        assert!(ensure_capability(&ctx, Capability::MessageSend).is_ok());
        assert!(ensure_capability(&ctx, Capability::UserManage).is_err());
    }

    #[test]
    fn super_admin_has_all_capabilities() {
        let ctx = mk_ctx(vec![Role::SuperAdmin]);
        for cap in [
            Capability::OrganizationManage,
            Capability::UserManage,
            Capability::RoleManage,
            Capability::ApiKeyManage,
            Capability::ChannelManage,
            Capability::TemplateManage,
            Capability::MessageSend,
            Capability::AuditView,
        ] {
            assert!(
                ensure_capability(&ctx, cap).is_ok(),
                "SuperAdmin missing {:?}",
                cap
            );
        }
    }
}
