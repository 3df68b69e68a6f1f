//! # Transit Core
//!
//! Core identity types, credential hashing, and configuration for the
//! Transit user service.
//!
//! This crate provides:
//! - Identity and role types carried inside signed tokens
//! - Argon2id password hashing, strength policy, and password generation
//! - A redacting wrapper for the token signing secret
//! - Configuration loading (JSON5 format) with environment overrides

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod password;
pub mod secrets;
pub mod types;

pub use config::{AuthConfig, Config, ConfigError, HashingConfig, ServerConfig};
pub use password::{
    CredentialHasher, PasswordError, generate_random_password, meets_strength_policy,
};
pub use secrets::{SecretError, SigningSecret};
pub use types::{Identity, Role};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::password::{CredentialHasher, meets_strength_policy};
    pub use crate::secrets::SigningSecret;
    pub use crate::types::*;
}
