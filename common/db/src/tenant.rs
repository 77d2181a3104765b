use uuid::Uuid;

/// Request-scoped tenant context, applied to the database session for the
/// lifetime of a single unit-of-work transaction.
///
/// Carried explicitly as a value threaded through handlers and the UoW
/// rather than via task-local/thread-local state, so it survives across
/// executors and is trivially testable without ambient globals.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub roles: Vec<String>,
    pub request_id: Option<Uuid>,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            user_id: None,
            roles: Vec::new(),
            request_id: None,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// An admin-scoped session may act without a tenant context, e.g. the
    /// login lookup that must resolve a user's organization before the
    /// context can be applied, or superadmin cross-tenant operations.
    pub fn is_admin_scope(roles: &[String]) -> bool {
        roles.iter().any(|r| r == "super_admin" || r == "system")
    }

    /// Postgres session-local settings applied by the UoW on transaction
    /// entry. Returned as `(key, value)` pairs for `set_config(..., true)`.
    pub fn session_settings(&self) -> Vec<(&'static str, String)> {
        vec![
            ("app.current_tenant", self.tenant_id.to_string()),
            (
                "app.current_user",
                self.user_id.map(|id| id.to_string()).unwrap_or_default(),
            ),
            ("app.current_roles", self.roles.join(",")),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_scope_requires_distinguished_role() {
        assert!(TenantContext::is_admin_scope(&["super_admin".to_string()]));
        assert!(TenantContext::is_admin_scope(&["system".to_string()]));
        assert!(!TenantContext::is_admin_scope(&["tenant_admin".to_string()]));
        assert!(!TenantContext::is_admin_scope(&[]));
    }

    #[test]
    fn session_settings_join_roles() {
        let ctx = TenantContext::new(Uuid::nil()).with_roles(vec!["agent".into(), "read_only".into()]);
        let settings = ctx.session_settings();
        assert_eq!(settings[2], ("app.current_roles", "agent,read_only".to_string()));
    }
}
