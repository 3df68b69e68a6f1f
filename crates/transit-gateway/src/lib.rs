//! # Transit Gateway
//!
//! HTTP surface for the Transit user service: token issuance and
//! verification, the authentication and authorization gates, and the
//! `/api/users` routes built on them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and authorization.
pub mod auth;
mod server;

pub use auth::{
    AuthError, AuthPipeline, Authenticated, RoleGate, SledUserStore, TokenError, TokenKind,
    TokenService, UserService, UserStore,
};
pub use server::{AppState, Gateway, GatewayBuilder, GatewayConfig, router};

/// Start the gateway server.
///
/// # Errors
///
/// Returns error if server fails to start.
pub async fn start(config: GatewayConfig) -> Result<(), GatewayError> {
    let gateway = Gateway::new(config)?;
    gateway.run().await
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
