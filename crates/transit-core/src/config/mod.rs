//! Configuration loading and validation.
//!
//! Config is read from a JSON5 file (default `~/.transit/transit.json`) and
//! then overridden from the environment. The token signing secret is only
//! ever read here, at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::secrets::{SecretError, SigningSecret};

/// Default access token lifetime (7 days).
const DEFAULT_ACCESS_EXPIRY_HOURS: u64 = 7 * 24;
/// Default refresh token lifetime.
const DEFAULT_REFRESH_EXPIRY_DAYS: u64 = 30;
/// Default expiring-soon threshold (1 hour).
const DEFAULT_EXPIRING_SOON_SECS: u64 = 3600;

const SECS_PER_HOUR: u64 = 3600;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Signing secret missing or unusable.
    #[error("Signing secret error: {0}")]
    Secret(#[from] SecretError),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns defaults if no file exists there.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` (or the default location), apply environment
    /// overrides, and validate the result.
    ///
    /// # Errors
    ///
    /// Returns error if loading or validation fails.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(p) => Self::load(p)?,
            None => Self::load_default()?,
        };
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("transit.json")
    }

    /// Get the Transit state directory.
    ///
    /// Uses `TRANSIT_STATE_DIR` env var if set, otherwise `~/.transit`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("TRANSIT_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".transit")
        } else {
            PathBuf::from(".transit")
        }
    }

    /// Apply overrides from process environment variables.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` to resolve variable names.
    ///
    /// Recognised variables: `TRANSIT_JWT_SECRET` (falling back to
    /// `JWT_SECRET`), `TRANSIT_ACCESS_TOKEN_EXPIRY_HOURS`,
    /// `TRANSIT_REFRESH_TOKEN_EXPIRY_DAYS`, `TRANSIT_PORT`, `TRANSIT_BIND`,
    /// `TRANSIT_DATA_DIR`. Unparseable numbers are ignored with a warning.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(secret) = lookup("TRANSIT_JWT_SECRET").or_else(|| lookup("JWT_SECRET")) {
            self.auth.jwt_secret = Some(secret);
        }

        if let Some(hours) = parse_override(&lookup, "TRANSIT_ACCESS_TOKEN_EXPIRY_HOURS") {
            self.auth.access_token_expiry_hours = hours;
        }
        if let Some(days) = parse_override(&lookup, "TRANSIT_REFRESH_TOKEN_EXPIRY_DAYS") {
            self.auth.refresh_token_expiry_days = days;
        }
        if let Some(port) = parse_override(&lookup, "TRANSIT_PORT") {
            self.server.port = port;
        }
        if let Some(bind) = lookup("TRANSIT_BIND") {
            self.server.bind_address = bind;
        }
        if let Some(dir) = lookup("TRANSIT_DATA_DIR") {
            self.server.data_dir = Some(PathBuf::from(dir));
        }

        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port cannot be 0".to_string(),
            ));
        }
        self.auth.validate()
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = key, "Ignoring unparseable override");
            None
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory for the user database. Defaults to `<state dir>/data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Enable permissive CORS.
    #[serde(default = "default_true")]
    pub cors: bool,
}

impl ServerConfig {
    /// Resolved data directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| Config::state_dir().join("data"))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            data_dir: None,
            cors: true,
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8080
}

const fn default_true() -> bool {
    true
}

/// Authentication configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Token signing secret. Required at startup.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Access token expiry in hours.
    #[serde(default = "default_access_expiry")]
    pub access_token_expiry_hours: u64,

    /// Refresh token expiry in days.
    #[serde(default = "default_refresh_expiry")]
    pub refresh_token_expiry_days: u64,

    /// Remaining lifetime at or below which a token counts as expiring soon.
    #[serde(default = "default_expiring_soon")]
    pub expiring_soon_threshold_secs: u64,

    /// Password hashing cost.
    #[serde(default)]
    pub hashing: HashingConfig,
}

const fn default_access_expiry() -> u64 {
    DEFAULT_ACCESS_EXPIRY_HOURS
}

const fn default_refresh_expiry() -> u64 {
    DEFAULT_REFRESH_EXPIRY_DAYS
}

const fn default_expiring_soon() -> u64 {
    DEFAULT_EXPIRING_SOON_SECS
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            access_token_expiry_hours: default_access_expiry(),
            refresh_token_expiry_days: default_refresh_expiry(),
            expiring_soon_threshold_secs: default_expiring_soon(),
            hashing: HashingConfig::default(),
        }
    }
}

impl AuthConfig {
    /// Create a new auth config builder.
    #[must_use]
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }

    /// Access token lifetime. Saturates on overflow; `validate` rejects such values.
    #[must_use]
    pub const fn access_token_expiry(&self) -> Duration {
        Duration::from_secs(self.access_token_expiry_hours.saturating_mul(SECS_PER_HOUR))
    }

    /// Refresh token lifetime. Saturates on overflow; `validate` rejects such values.
    #[must_use]
    pub const fn refresh_token_expiry(&self) -> Duration {
        Duration::from_secs(self.refresh_token_expiry_days.saturating_mul(SECS_PER_DAY))
    }

    /// Expiring-soon threshold.
    #[must_use]
    pub const fn expiring_soon_threshold(&self) -> Duration {
        Duration::from_secs(self.expiring_soon_threshold_secs)
    }

    /// Build the signing secret from the configured value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Secret` if no secret is configured or it is blank.
    pub fn signing_secret(&self) -> Result<SigningSecret, ConfigError> {
        Ok(SigningSecret::from_configured(self.jwt_secret.as_deref())?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.access_token_expiry_hours == 0 {
            return Err(ConfigError::Validation(
                "Access token expiry must be positive".to_string(),
            ));
        }
        if self.refresh_token_expiry_days == 0 {
            return Err(ConfigError::Validation(
                "Refresh token expiry must be positive".to_string(),
            ));
        }
        if self.access_token_expiry_hours.checked_mul(SECS_PER_HOUR).is_none() {
            return Err(ConfigError::Validation(
                "Access token expiry is too large".to_string(),
            ));
        }
        if self.refresh_token_expiry_days.checked_mul(SECS_PER_DAY).is_none() {
            return Err(ConfigError::Validation(
                "Refresh token expiry is too large".to_string(),
            ));
        }
        if self.refresh_token_expiry() < self.access_token_expiry() {
            return Err(ConfigError::Validation(
                "Refresh token expiry cannot be shorter than access token expiry".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field(
                "jwt_secret",
                &self.jwt_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("access_token_expiry_hours", &self.access_token_expiry_hours)
            .field("refresh_token_expiry_days", &self.refresh_token_expiry_days)
            .field(
                "expiring_soon_threshold_secs",
                &self.expiring_soon_threshold_secs,
            )
            .field("hashing", &self.hashing)
            .finish()
    }
}

/// Builder for `AuthConfig`.
#[derive(Debug, Default)]
pub struct AuthConfigBuilder {
    config: AuthConfig,
}

impl AuthConfigBuilder {
    /// Set the JWT secret.
    #[must_use]
    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt_secret = Some(secret.into());
        self
    }

    /// Set access token expiry in hours.
    #[must_use]
    pub const fn access_token_expiry_hours(mut self, hours: u64) -> Self {
        self.config.access_token_expiry_hours = hours;
        self
    }

    /// Set refresh token expiry in days.
    #[must_use]
    pub const fn refresh_token_expiry_days(mut self, days: u64) -> Self {
        self.config.refresh_token_expiry_days = days;
        self
    }

    /// Set the expiring-soon threshold in seconds.
    #[must_use]
    pub const fn expiring_soon_threshold_secs(mut self, secs: u64) -> Self {
        self.config.expiring_soon_threshold_secs = secs;
        self
    }

    /// Set the password hashing cost.
    #[must_use]
    pub const fn hashing(mut self, hashing: HashingConfig) -> Self {
        self.config.hashing = hashing;
        self
    }

    /// Build the config.
    #[must_use]
    pub fn build(self) -> AuthConfig {
        self.config
    }
}

/// Argon2id cost parameters.
///
/// Defaults follow the Argon2 crate's recommended parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashingConfig {
    /// Memory cost in KiB.
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,

    /// Number of passes.
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    /// Degree of parallelism.
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

const fn default_memory_kib() -> u32 {
    argon2::Params::DEFAULT_M_COST
}

const fn default_iterations() -> u32 {
    argon2::Params::DEFAULT_T_COST
}

const fn default_parallelism() -> u32 {
    argon2::Params::DEFAULT_P_COST
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}
