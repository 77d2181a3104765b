use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleUseTokenKind {
    EmailVerification,
    PasswordReset,
}

impl SingleUseTokenKind {
    pub fn ttl(&self) -> Duration {
        match self {
            SingleUseTokenKind::EmailVerification => Duration::hours(24),
            SingleUseTokenKind::PasswordReset => Duration::hours(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SingleUseToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: SingleUseTokenKind,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub fn issue(user_id: Uuid, kind: SingleUseTokenKind) -> (String, SingleUseToken) {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    let plaintext = base64_url(&buf);
    let now = Utc::now();
    let row = SingleUseToken {
        id: Uuid::new_v4(),
        user_id,
        kind,
        token_hash: hash(&plaintext),
        expires_at: now + kind.ttl(),
        used_at: None,
        created_at: now,
    };
    (plaintext, row)
}

pub fn hash(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

fn base64_url(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVerifyOutcome {
    Valid,
    Invalid,
    Expired,
    AlreadyUsed,
}

impl SingleUseToken {
    pub fn check(&self, now: DateTime<Utc>) -> TokenVerifyOutcome {
        if self.used_at.is_some() {
            return TokenVerifyOutcome::AlreadyUsed;
        }
        if self.expires_at <= now {
            return TokenVerifyOutcome::Expired;
        }
        TokenVerifyOutcome::Valid
    }

    /// Marks the token used. Callers must persist this atomically with the
    /// side effect it authorizes (verifying an email, resetting a password)
    /// in the same transaction.
    pub fn mark_used(&mut self) -> Result<(), DomainError> {
        if self.used_at.is_some() {
            return Err(DomainError::Policy("token already used".into()));
        }
        self.used_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_checks_valid() {
        let (_plaintext, row) = issue(Uuid::new_v4(), SingleUseTokenKind::PasswordReset);
        assert_eq!(row.check(Utc::now()), TokenVerifyOutcome::Valid);
    }

    #[test]
    fn expired_token_reports_expired() {
        let (_plaintext, mut row) = issue(Uuid::new_v4(), SingleUseTokenKind::PasswordReset);
        row.expires_at = Utc::now() - Duration::seconds(1);
        assert_eq!(row.check(Utc::now()), TokenVerifyOutcome::Expired);
    }

    #[test]
    fn used_token_reports_already_used_and_rejects_reuse() {
        let (_plaintext, mut row) = issue(Uuid::new_v4(), SingleUseTokenKind::EmailVerification);
        row.mark_used().unwrap();
        assert_eq!(row.check(Utc::now()), TokenVerifyOutcome::AlreadyUsed);
        assert!(row.mark_used().is_err());
    }
}
