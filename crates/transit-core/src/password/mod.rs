//! Password hashing, strength policy, and password generation.
//!
//! - `CredentialHasher`: salted Argon2id hashing with configurable cost
//! - `meets_strength_policy`: length and character-class checks
//! - `generate_random_password`: CSPRNG-backed password generator

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand::{Rng, rngs::OsRng, seq::SliceRandom};
use thiserror::Error;

use crate::config::HashingConfig;

/// Minimum password length accepted by the strength policy.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Default length of generated passwords.
pub const DEFAULT_GENERATED_LENGTH: usize = 12;

const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";

/// Special characters recognised by the strength policy.
pub const SPECIAL_CHARS: &[u8] = b"!@#$%^&*";

const ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";

/// Errors from the hashing transform.
#[derive(Error, Debug)]
pub enum PasswordError {
    /// Hash parameters rejected by Argon2.
    #[error("Invalid hashing parameters: {0}")]
    InvalidParams(String),

    /// Hashing or verification failed inside the transform.
    #[error("Error hashing password: {0}")]
    HashingFailure(String),
}

/// One-way password hasher.
///
/// Wraps Argon2id with the cost parameters from [`HashingConfig`]. Each
/// call to [`hash`](Self::hash) draws a fresh salt from the OS RNG.
#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
    config: HashingConfig,
}

impl CredentialHasher {
    /// Create a hasher with the given cost parameters.
    ///
    /// # Errors
    ///
    /// Returns `PasswordError::InvalidParams` if Argon2 rejects the parameters.
    pub fn new(config: &HashingConfig) -> Result<Self, PasswordError> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| PasswordError::InvalidParams(e.to_string()))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            config: config.clone(),
        })
    }

    /// Hash a plaintext password into a PHC string.
    ///
    /// # Errors
    ///
    /// Returns `PasswordError::HashingFailure` if the transform fails.
    pub fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| PasswordError::HashingFailure(e.to_string()))
    }

    /// Verify a plaintext password against a stored hash.
    ///
    /// Returns `Ok(false)` on mismatch. The cost parameters embedded in the
    /// stored hash are used, so hashes survive a cost change.
    ///
    /// # Errors
    ///
    /// Returns `PasswordError::HashingFailure` if the stored hash is malformed
    /// or the transform fails.
    pub fn verify(&self, plaintext: &str, hashed: &str) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(hashed)
            .map_err(|e| PasswordError::HashingFailure(format!("invalid stored hash: {e}")))?;

        match self.argon2.verify_password(plaintext.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(PasswordError::HashingFailure(e.to_string())),
        }
    }

    /// Cost parameters in use.
    #[must_use]
    pub const fn config(&self) -> &HashingConfig {
        &self.config
    }
}

impl std::fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHasher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Check a password against the strength policy.
///
/// Requires at least [`MIN_PASSWORD_LENGTH`] characters including an ASCII
/// uppercase letter, an ASCII lowercase letter, a digit, and one of
/// [`SPECIAL_CHARS`].
#[must_use]
pub fn meets_strength_policy(plaintext: &str) -> bool {
    plaintext.chars().count() >= MIN_PASSWORD_LENGTH
        && plaintext.chars().any(|c| c.is_ascii_uppercase())
        && plaintext.chars().any(|c| c.is_ascii_lowercase())
        && plaintext.chars().any(|c| c.is_ascii_digit())
        && plaintext.bytes().any(|b| SPECIAL_CHARS.contains(&b))
}

/// Generate a random password that satisfies [`meets_strength_policy`].
///
/// One character is drawn from each class, the rest uniformly from the
/// combined alphabet, and the result is shuffled. Selection and shuffle both
/// use the OS RNG. Lengths below [`MIN_PASSWORD_LENGTH`] are raised to it.
#[must_use]
pub fn generate_random_password(length: usize) -> String {
    let length = length.max(MIN_PASSWORD_LENGTH);
    let mut rng = OsRng;

    let mut bytes: Vec<u8> = [UPPERCASE, LOWERCASE, DIGITS, SPECIAL_CHARS]
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();

    let required = bytes.len();
    bytes.extend((required..length).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())]));
    bytes.shuffle(&mut rng);

    bytes.into_iter().map(char::from).collect()
}
