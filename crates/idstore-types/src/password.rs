use std::fmt;

use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("unsupported password algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("malformed password salt: {0}")]
    MalformedSalt(String),
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// Hash algorithms a stored password record may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PasswordAlgorithm {
    #[serde(rename = "ARGON2ID")]
    Argon2id,
}

impl PasswordAlgorithm {
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::Argon2id => "ARGON2ID",
        }
    }

    pub fn parse(identifier: &str) -> Result<Self, PasswordError> {
        match identifier {
            "ARGON2ID" => Ok(Self::Argon2id),
            other => Err(PasswordError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    fn hash(&self, plain: &str, salt: &SaltString) -> Result<String, PasswordError> {
        match self {
            Self::Argon2id => {
                let hashed = Argon2::default()
                    .hash_password(plain.as_bytes(), salt)
                    .map_err(|e| PasswordError::Hashing(e.to_string()))?;
                hashed
                    .hash
                    .map(|output| output.to_string())
                    .ok_or_else(|| PasswordError::Hashing("no hash output".into()))
            }
        }
    }
}

impl fmt::Display for PasswordAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// A stored password: algorithm, hash and salt kept as separate fields.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Password {
    pub algorithm: PasswordAlgorithm,
    pub hash: String,
    pub salt: String,
}

impl Password {
    /// Hash `plain` with Argon2id and a fresh random salt.
    pub fn hash(plain: &str) -> Result<Self, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        let algorithm = PasswordAlgorithm::Argon2id;
        let hash = algorithm.hash(plain, &salt)?;
        Ok(Self {
            algorithm,
            hash,
            salt: salt.as_str().to_string(),
        })
    }

    /// Returns true if `plain` hashes to the stored value.
    pub fn check(&self, plain: &str) -> Result<bool, PasswordError> {
        let salt = SaltString::from_b64(&self.salt)
            .map_err(|e| PasswordError::MalformedSalt(e.to_string()))?;
        let hash = self.algorithm.hash(plain, &salt)?;
        Ok(constant_time_eq(hash.as_bytes(), self.hash.as_bytes()))
    }
}

// Hash and salt stay out of debug output.
impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Password")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_check() {
        let password = Password::hash("correct horse").unwrap();
        assert_eq!(password.algorithm, PasswordAlgorithm::Argon2id);
        assert!(password.check("correct horse").unwrap());
        assert!(!password.check("battery staple").unwrap());
    }

    #[test]
    fn salts_differ_between_hashes() {
        let a = Password::hash("same").unwrap();
        let b = Password::hash("same").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(matches!(
            PasswordAlgorithm::parse("MD5"),
            Err(PasswordError::UnsupportedAlgorithm(name)) if name == "MD5"
        ));
    }

    #[test]
    fn debug_hides_hash() {
        let password = Password::hash("secret").unwrap();
        let debug = format!("{:?}", password);
        assert!(!debug.contains(&password.hash));
    }
}
