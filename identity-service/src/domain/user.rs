use chrono::{DateTime, Duration, Utc};
use common_db::{DomainEvent, EventBuffer};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::email::Email;
use crate::domain::events::{UserLockedOut, UserLoggedIn, UserPasswordChanged, UserRegistered};
use crate::domain::password::PasswordHash;
use crate::domain::phone::Phone;
use crate::domain::DomainError;

pub const MAX_FAILED_ATTEMPTS: i16 = 5;
pub const LOCKOUT_MINUTES: i64 = 15;

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: Email,
    pub phone: Option<Phone>,
    pub password_hash: PasswordHash,
    pub full_name: String,
    pub is_active: bool,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub failed_login_attempts: i16,
    pub locked_until: Option<DateTime<Utc>>,
    pub mfa_secret: Option<String>,
    pub mfa_pending_secret: Option<String>,
    pub mfa_enrolled_at: Option<DateTime<Utc>>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub(crate) events: EventBuffer,
}

impl User {
    pub fn register(
        organization_id: Uuid,
        email: Email,
        password_hash: PasswordHash,
        full_name: String,
        phone: Option<Phone>,
    ) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut events = EventBuffer::default();
        events.push(UserRegistered {
            aggregate_id: id,
            organization_id: Some(organization_id),
            email: email.as_str().to_string(),
        });

        Self {
            id,
            organization_id,
            email,
            phone,
            password_hash,
            full_name,
            is_active: true,
            email_verified: false,
            phone_verified: false,
            last_login_at: None,
            failed_login_attempts: 0,
            locked_until: None,
            mfa_secret: None,
            mfa_pending_secret: None,
            mfa_enrolled_at: None,
            metadata: Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
            events,
        }
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map(|until| until > now).unwrap_or(false)
    }

    pub fn record_login_success(&mut self, ip_address: Option<String>) {
        self.failed_login_attempts = 0;
        self.locked_until = None;
        self.last_login_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self.events.push(UserLoggedIn {
            aggregate_id: self.id,
            organization_id: Some(self.organization_id),
            ip_address,
        });
    }

    /// Returns `true` if this failure just crossed the lockout threshold.
    pub fn record_login_failure(&mut self) -> bool {
        self.failed_login_attempts += 1;
        self.updated_at = Utc::now();
        if self.failed_login_attempts >= MAX_FAILED_ATTEMPTS {
            self.locked_until = Some(Utc::now() + Duration::minutes(LOCKOUT_MINUTES));
            self.events.push(UserLockedOut {
                aggregate_id: self.id,
                organization_id: Some(self.organization_id),
                failed_attempts: self.failed_login_attempts,
            });
            true
        } else {
            false
        }
    }

    pub fn verify_email(&mut self) {
        self.email_verified = true;
        self.updated_at = Utc::now();
    }

    /// Changing the password resets the lockout counter and signals that all
    /// refresh tokens for this user must be revoked; the handler performs
    /// the actual revocation against `RefreshToken` rows.
    pub fn change_password(&mut self, new_hash: PasswordHash) {
        self.password_hash = new_hash;
        self.failed_login_attempts = 0;
        self.locked_until = None;
        self.updated_at = Utc::now();
        self.events.push(UserPasswordChanged {
            aggregate_id: self.id,
            organization_id: Some(self.organization_id),
        });
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
        self.events.push(crate::domain::events::UserDeactivated {
            aggregate_id: self.id,
            organization_id: Some(self.organization_id),
        });
    }

    pub fn drain_events(&mut self) -> Vec<Box<dyn DomainEvent>> {
        self.events.drain_events()
    }

    /// Stages a new TOTP secret pending confirmation by `confirm_mfa_enrollment`.
    pub fn begin_mfa_enrollment(&mut self, secret: String) {
        self.mfa_pending_secret = Some(secret);
        self.updated_at = Utc::now();
    }

    /// Confirms a pending secret as the active one, completing enrollment.
    pub fn confirm_mfa_enrollment(&mut self) -> Result<(), DomainError> {
        let secret = self
            .mfa_pending_secret
            .take()
            .ok_or_else(|| DomainError::Policy("no MFA enrollment in progress".into()))?;
        self.mfa_secret = Some(secret);
        self.mfa_enrolled_at = Some(Utc::now());
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mfa_enrolled(&self) -> bool {
        self.mfa_secret.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_user() -> User {
        User::register(
            Uuid::new_v4(),
            Email::parse("alice@example.com").unwrap(),
            PasswordHash::hash("s3cret!12345").unwrap(),
            "Alice".into(),
            None,
        )
    }

    #[test]
    fn fifth_failure_locks_account_for_fifteen_minutes() {
        let mut user = mk_user();
        user.drain_events();
        for i in 1..MAX_FAILED_ATTEMPTS {
            assert!(!user.record_login_failure(), "should not lock on attempt {i}");
        }
        assert!(user.record_login_failure());
        assert!(user.is_locked(Utc::now()));
        let until = user.locked_until.unwrap();
        let delta = until - Utc::now();
        assert!(delta.num_minutes() >= LOCKOUT_MINUTES - 1);
    }

    #[test]
    fn successful_login_resets_counter_and_lock() {
        let mut user = mk_user();
        for _ in 0..MAX_FAILED_ATTEMPTS {
            user.record_login_failure();
        }
        assert!(user.is_locked(Utc::now()));
        user.record_login_success(None);
        assert_eq!(user.failed_login_attempts, 0);
        assert!(!user.is_locked(Utc::now()));
    }

    #[test]
    fn password_change_resets_lockout_state() {
        let mut user = mk_user();
        user.record_login_failure();
        user.record_login_failure();
        user.change_password(PasswordHash::hash("new-password-99").unwrap());
        assert_eq!(user.failed_login_attempts, 0);
        assert!(user.locked_until.is_none());
    }
}
