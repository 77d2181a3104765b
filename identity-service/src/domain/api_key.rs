use std::collections::BTreeSet;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::permission::Permission;
use crate::domain::DomainError;

const KEY_PREFIX: &str = "sk_live_";

#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub permissions: BTreeSet<Permission>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Generates a new API key; returns the plaintext (shown once) and the row
/// to persist. The visible prefix lets operators find a key in a UI without
/// ever reconstituting the secret.
pub fn issue(
    organization_id: Uuid,
    user_id: Option<Uuid>,
    name: String,
    permissions: BTreeSet<Permission>,
    expires_at: Option<DateTime<Utc>>,
) -> (String, ApiKey) {
    let mut buf = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut buf);
    let secret = URL_SAFE_NO_PAD.encode(buf);
    let visible_suffix = &secret[..8.min(secret.len())];
    let plaintext = format!("{KEY_PREFIX}{secret}");
    let now = Utc::now();
    let row = ApiKey {
        id: Uuid::new_v4(),
        organization_id,
        user_id,
        name,
        key_hash: hash(&plaintext),
        key_prefix: format!("{KEY_PREFIX}{visible_suffix}"),
        permissions,
        last_used_at: None,
        expires_at,
        is_active: true,
        revoked_at: None,
        created_at: now,
    };
    (plaintext, row)
}

pub fn hash(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

impl ApiKey {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.revoked_at.is_none()
            && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }

    pub fn revoke(&mut self) -> Result<(), DomainError> {
        if self.revoked_at.is_some() {
            return Err(DomainError::Policy("api key already revoked".into()));
        }
        self.revoked_at = Some(Utc::now());
        self.is_active = false;
        Ok(())
    }

    pub fn record_use(&mut self) {
        self.last_used_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_key_hash_matches_and_prefix_is_visible() {
        let (plaintext, row) = issue(Uuid::new_v4(), None, "ci".into(), BTreeSet::new(), None);
        assert_eq!(hash(&plaintext), row.key_hash);
        assert!(plaintext.starts_with(&row.key_prefix));
    }

    #[test]
    fn expired_key_is_invalid() {
        let (_plaintext, mut row) = issue(Uuid::new_v4(), None, "ci".into(), BTreeSet::new(), None);
        row.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(!row.is_valid(Utc::now()));
    }

    #[test]
    fn revoke_is_not_idempotent() {
        let (_plaintext, mut row) = issue(Uuid::new_v4(), None, "ci".into(), BTreeSet::new(), None);
        row.revoke().unwrap();
        assert!(row.revoke().is_err());
    }
}
