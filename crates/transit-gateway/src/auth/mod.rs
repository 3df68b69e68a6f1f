//! Authentication and authorization for the gateway.
//!
//! This module provides:
//! - Signed access/refresh token issuance and verification
//! - The authentication gate (bearer token → verified identity)
//! - The authorization gate (identity role → allow/deny)
//! - User registration, login, and profile management over a user store

mod jwt;
mod middleware;
mod service;
mod users;

pub use jwt::{
    Claims, DEFAULT_EXPIRING_SOON_THRESHOLD, IssuedToken, TokenError, TokenKind, TokenPair,
    TokenService,
};
pub use middleware::{
    AuthPipeline, Authenticated, BEARER_PREFIX, RoleGate, authenticate, extract_bearer,
    require_auth, require_roles,
};
pub use service::{
    CreateUser, Login, LoginResult, PasswordResetRequest, UpdateProfile, UserService,
};
pub use users::{CredentialRecord, PublicUser, SledUserStore, UserPatch, UserStore};

use thiserror::Error;
use transit_core::{ConfigError, PasswordError};

/// Authentication errors.
///
/// Display strings are the messages returned to clients for 4xx variants.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Startup configuration is unusable (missing signing secret, bad cost).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The password hashing transform failed.
    #[error("Error hashing password: {0}")]
    HashingFailure(String),

    /// Token encoding failed.
    #[error("Token signing failed: {0}")]
    TokenSigning(String),

    /// No bearer token on the request.
    #[error("No token provided")]
    MissingToken,

    /// Token signature was valid but it has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Token failed signature or structure checks.
    #[error("Invalid token")]
    TokenInvalid,

    /// Authentication failed for an unanticipated reason.
    #[error("Unauthorized")]
    Unauthorized,

    /// Role check ran without an authenticated identity.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Identity's role is not allowed on this route.
    #[error("Insufficient permissions")]
    Forbidden,

    /// Login email/password did not match.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Registration with an email already in use.
    #[error("User already exists")]
    UserExists,

    /// User not found.
    #[error("User not found")]
    UserNotFound,

    /// Password rejected by the strength policy.
    #[error(
        "Password must be at least 8 characters and include uppercase, lowercase, digit, and special characters"
    )]
    WeakPassword,

    /// Request body failed validation.
    #[error("{0}")]
    Validation(String),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// Whether this error is a server-side fault whose detail must not be
    /// exposed to clients.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::HashingFailure(_)
                | Self::TokenSigning(_)
                | Self::Storage(_)
        )
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::InvalidParams(e) => Self::Configuration(e),
            PasswordError::HashingFailure(e) => Self::HashingFailure(e),
        }
    }
}

impl From<ConfigError> for AuthError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => Self::TokenExpired,
            TokenError::Invalid | TokenError::Malformed => Self::TokenInvalid,
        }
    }
}
