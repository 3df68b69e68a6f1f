//! Signed identity tokens.
//!
//! Access and refresh tokens share one payload shape and differ only in
//! lifetime. Tokens are HS256 JWTs signed with a single symmetric secret.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use transit_core::{AuthConfig, Identity, Role, SigningSecret};

use super::AuthError;

/// Signing algorithm for every token.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Default expiring-soon threshold (1 hour).
pub const DEFAULT_EXPIRING_SOON_THRESHOLD: Duration = Duration::from_secs(3600);

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// User ID.
    pub user_id: String,
    /// User role.
    pub role: Role,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
}

impl Claims {
    /// Identity carried by these claims.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity::new(self.user_id.clone(), self.role)
    }

    /// Whether the claims have expired at `now`. Expiry is inclusive.
    #[must_use]
    pub const fn is_expired_at(&self, now: i64) -> bool {
        now >= self.exp
    }
}

/// Token flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived token presented on every request.
    Access,
    /// Long-lived token used to obtain new access tokens.
    Refresh,
}

/// Verification failure.
///
/// `Invalid` and `Malformed` are kept apart for logging but collapse to a
/// single "Invalid token" at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Signature verified but the token is past its expiry.
    #[error("Token expired")]
    Expired,
    /// Signature or algorithm check failed.
    #[error("Invalid token")]
    Invalid,
    /// Not a decodable token.
    #[error("Malformed token")]
    Malformed,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_)
            | ErrorKind::MissingRequiredClaim(_)
            | ErrorKind::MissingAlgorithm => Self::Malformed,
            _ => Self::Invalid,
        }
    }
}

/// A signed token and its expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    /// Encoded token.
    pub token: String,
    /// Expiration time.
    pub expires_at: DateTime<Utc>,
}

/// A pair of access and refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    /// Access token.
    pub access_token: String,
    /// Refresh token.
    pub refresh_token: String,
    /// Access token expiration.
    pub expires_at: DateTime<Utc>,
    /// Refresh token expiration.
    pub refresh_expires_at: DateTime<Utc>,
    /// Token type (always "Bearer").
    pub token_type: String,
}

/// Issues and verifies signed identity tokens.
///
/// Stateless: holds only the keys and lifetime policy, so one instance is
/// shared across all requests.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_expiry: Duration,
    refresh_expiry: Duration,
}

impl TokenService {
    /// Create a token service with an explicit secret and lifetimes.
    #[must_use]
    pub fn new(secret: &SigningSecret, access_expiry: Duration, refresh_expiry: Duration) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        // Expiry is checked against our own clock so `exp == now` is rejected.
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.expose()),
            decoding_key: DecodingKey::from_secret(secret.expose()),
            validation,
            access_expiry,
            refresh_expiry,
        }
    }

    /// Create a token service from auth configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if no signing secret is configured.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let secret = config.signing_secret()?;
        Ok(Self::new(
            &secret,
            config.access_token_expiry(),
            config.refresh_token_expiry(),
        ))
    }

    /// Lifetime for a token kind.
    #[must_use]
    pub const fn lifetime(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_expiry,
            TokenKind::Refresh => self.refresh_expiry,
        }
    }

    /// Issue a token for `identity`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::TokenSigning` if encoding fails.
    pub fn issue(&self, identity: &Identity, kind: TokenKind) -> Result<IssuedToken, AuthError> {
        self.issue_at(identity, kind, Utc::now().timestamp())
    }

    /// Issue a token as if the current time were `now` (Unix seconds).
    ///
    /// # Errors
    ///
    /// Returns `AuthError::TokenSigning` if encoding fails.
    pub fn issue_at(
        &self,
        identity: &Identity,
        kind: TokenKind,
        now: i64,
    ) -> Result<IssuedToken, AuthError> {
        let lifetime = i64::try_from(self.lifetime(kind).as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            user_id: identity.user_id.clone(),
            role: identity.role,
            iat: now,
            exp: now.saturating_add(lifetime),
        };

        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenSigning(format!("Encoding failed: {e}")))?;

        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Ok(IssuedToken { token, expires_at })
    }

    /// Issue an access and a refresh token for `identity`.
    ///
    /// # Errors
    ///
    /// Returns error if token creation fails.
    pub fn issue_pair(&self, identity: &Identity) -> Result<TokenPair, AuthError> {
        let now = Utc::now().timestamp();
        let access = self.issue_at(identity, TokenKind::Access, now)?;
        let refresh = self.issue_at(identity, TokenKind::Refresh, now)?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            expires_at: access.expires_at,
            refresh_expires_at: refresh.expires_at,
            token_type: "Bearer".to_string(),
        })
    }

    /// Verify a token and return the identity it carries.
    ///
    /// # Errors
    ///
    /// Returns the `TokenError` kind describing why verification failed.
    pub fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify a token as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// Returns the `TokenError` kind describing why verification failed.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Identity, TokenError> {
        self.decode_at(token, now).map(|claims| claims.identity())
    }

    /// Verify a token and return its full claims.
    ///
    /// # Errors
    ///
    /// Returns the `TokenError` kind describing why verification failed.
    pub fn decode_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)?.claims;

        if claims.is_expired_at(now) {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Check whether a token is within `threshold` of expiring.
    ///
    /// Any verification failure counts as expiring.
    #[must_use]
    pub fn is_expiring_soon(&self, token: &str, threshold: Duration) -> bool {
        self.is_expiring_soon_at(token, threshold, Utc::now().timestamp())
    }

    /// [`is_expiring_soon`](Self::is_expiring_soon) evaluated at `now`.
    #[must_use]
    pub fn is_expiring_soon_at(&self, token: &str, threshold: Duration, now: i64) -> bool {
        let threshold = i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX);
        self.decode_at(token, now)
            .map_or(true, |claims| claims.exp.saturating_sub(now) <= threshold)
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_expiry", &self.access_expiry)
            .field("refresh_expiry", &self.refresh_expiry)
            .finish_non_exhaustive()
    }
}
