use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Generates a new refresh token; returns the plaintext (shown to the
/// client exactly once) alongside the row to persist. The plaintext is
/// never stored.
pub fn issue(user_id: Uuid) -> (String, RefreshToken) {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    let plaintext = format!("{}.{}", Uuid::new_v4(), hex::encode(buf));
    let now = Utc::now();
    let row = RefreshToken {
        id: Uuid::new_v4(),
        user_id,
        token_hash: hash(&plaintext),
        expires_at: now + Duration::days(REFRESH_TOKEN_TTL_DAYS),
        revoked_at: None,
        created_at: now,
    };
    (plaintext, row)
}

pub fn hash(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    hex::encode(digest)
}

impl RefreshToken {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_hashes_match_and_are_valid() {
        let (plaintext, row) = issue(Uuid::new_v4());
        assert_eq!(hash(&plaintext), row.token_hash);
        assert!(row.is_valid(Utc::now()));
    }

    #[test]
    fn revoked_token_is_invalid() {
        let (_plaintext, mut row) = issue(Uuid::new_v4());
        row.revoked_at = Some(Utc::now());
        assert!(!row.is_valid(Utc::now()));
    }
}
