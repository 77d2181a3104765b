use common_db::DomainEvent;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

macro_rules! identity_event {
    ($name:ident, $event_type:literal, $aggregate_type:literal, { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, Serialize)]
        pub struct $name {
            pub aggregate_id: Uuid,
            pub organization_id: Option<Uuid>,
            $(pub $field: $ty,)*
        }

        impl DomainEvent for $name {
            fn event_type(&self) -> &'static str {
                $event_type
            }

            fn aggregate_type(&self) -> &'static str {
                $aggregate_type
            }

            fn aggregate_id(&self) -> Uuid {
                self.aggregate_id
            }

            fn organization_id(&self) -> Option<Uuid> {
                self.organization_id
            }

            fn payload(&self) -> Value {
                serde_json::to_value(self).unwrap_or(Value::Null)
            }
        }
    };
}

identity_event!(OrganizationCreated, "organization.created", "Organization", {
    name: String,
    slug: String,
});

identity_event!(UserRegistered, "user.registered", "User", {
    email: String,
});

identity_event!(UserLoggedIn, "user.logged_in", "User", {
    ip_address: Option<String>,
});

identity_event!(UserLockedOut, "user.locked_out", "User", {
    failed_attempts: i16,
});

identity_event!(UserPasswordChanged, "user.password_changed", "User", {});

identity_event!(UserDeactivated, "user.deactivated", "User", {});

identity_event!(RoleAssigned, "role.assigned", "User", {
    role_id: Uuid,
    granted_by: Option<Uuid>,
});

identity_event!(RoleRevoked, "role.revoked", "User", {
    role_id: Uuid,
    revoked_by: Option<Uuid>,
});

identity_event!(RefreshTokenIssued, "refresh_token.issued", "User", {
    token_id: Uuid,
});

identity_event!(RefreshTokenCompromised, "refresh_token.compromised", "User", {
    token_id: Uuid,
});

identity_event!(EmailVerified, "user.email_verified", "User", {});

identity_event!(PasswordResetRequested, "user.password_reset_requested", "User", {});

identity_event!(PasswordResetCompleted, "user.password_reset_completed", "User", {});

identity_event!(ApiKeyCreated, "api_key.created", "ApiKey", {
    prefix: String,
});

identity_event!(ApiKeyRevoked, "api_key.revoked", "ApiKey", {});
