//! Token signing secret.
//!
//! The secret is wrapped in `secrecy::SecretBox` so it never shows up in
//! logs or debug output, and is zeroized on drop.

use rand::RngCore;
use secrecy::{ExposeSecret, SecretBox};
use thiserror::Error;

/// Errors constructing a signing secret.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    /// No secret was configured.
    #[error("JWT secret is not defined")]
    Missing,

    /// The configured secret is empty.
    #[error("JWT secret is empty")]
    Empty,
}

/// Symmetric secret used to sign and verify tokens.
pub struct SigningSecret(SecretBox<[u8]>);

impl SigningSecret {
    /// Wrap a configured secret.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::Empty` if the secret is empty or whitespace.
    pub fn new(secret: impl Into<String>) -> Result<Self, SecretError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(SecretError::Empty);
        }
        Ok(Self(SecretBox::new(secret.into_bytes().into_boxed_slice())))
    }

    /// Wrap an optional configured secret, failing if absent.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::Missing` if `secret` is `None`, or
    /// `SecretError::Empty` if it is blank.
    pub fn from_configured(secret: Option<&str>) -> Result<Self, SecretError> {
        secret.map_or(Err(SecretError::Missing), Self::new)
    }

    /// Generate a random 256-bit secret.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(SecretBox::new(bytes.into_boxed_slice()))
    }

    /// Expose the raw secret bytes for key construction.
    ///
    /// Use sparingly - only when building signing keys.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningSecret([REDACTED])")
    }
}
