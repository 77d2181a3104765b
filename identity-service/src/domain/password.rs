use argon2::password_hash::{rand_core::OsRng, PasswordHash as Argon2Hash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Opaque Argon2id hash. Never implements `Display`/logs its value; `Debug`
/// is redacted so it is safe to include a `PasswordHash` in a struct that
/// derives `Debug` for tracing.
#[derive(Clone, Serialize, Deserialize)]
pub struct PasswordHash(String);

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordHash([redacted])")
    }
}

impl PasswordHash {
    pub fn hash(plaintext: &str) -> Result<Self, DomainError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| DomainError::Internal(format!("password hashing failed: {e}")))?
            .to_string();
        Ok(Self(hash))
    }

    pub fn from_stored(hash: String) -> Result<Self, DomainError> {
        if hash.len() < 32 {
            return Err(DomainError::Internal("stored password hash is malformed".into()));
        }
        Ok(Self(hash))
    }

    pub fn verify(&self, candidate: &str) -> bool {
        match Argon2Hash::new(&self.0) {
            Ok(parsed) => Argon2::default()
                .verify_password(candidate.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let hash = PasswordHash::hash("correct horse battery staple").unwrap();
        assert!(hash.verify("correct horse battery staple"));
        assert!(!hash.verify("wrong password"));
    }

    #[test]
    fn debug_never_leaks_the_hash() {
        let hash = PasswordHash::hash("s3cret!").unwrap();
        assert_eq!(format!("{hash:?}"), "PasswordHash([redacted])");
    }
}
