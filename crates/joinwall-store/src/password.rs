use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher as ArgonPasswordHasher, PasswordVerifier};

use crate::error::{RecordError, Result};

/// Argon2id hashing for stored user passwords.
pub struct PasswordHasher {
    context: Argon2<'static>,
}

impl PasswordHasher {
    pub fn new() -> Self {
        Self {
            context: Argon2::default(),
        }
    }

    /// Hashes with a fresh random salt and returns the PHC string.
    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.context
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| RecordError::PasswordHash(e.to_string()))
    }

    /// Verify a password against a stored hash. A value that is not a PHC
    /// string never verifies.
    pub fn verify_password(&self, password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .context
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Whether a stored value is already an Argon2 PHC string.
    pub fn is_hashed(value: &str) -> bool {
        value.starts_with("$argon2") && PasswordHash::new(value).is_ok()
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}
