//! Token commands - issue and inspect signed tokens.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use transit_core::{Identity, Role};
use transit_gateway::auth::{TokenError, TokenKind, TokenService};

use crate::ui;

fn token_service(config_path: Option<&Path>) -> Result<(TokenService, Duration)> {
    let config = super::load_config(config_path)?;
    let tokens = TokenService::from_config(&config.auth)
        .context("Set TRANSIT_JWT_SECRET or auth.jwtSecret to sign tokens")?;
    Ok((tokens, config.auth.expiring_soon_threshold()))
}

/// Issue an access or refresh token and print it.
pub fn run_issue_token(
    config_path: Option<&Path>,
    user_id: String,
    role: Role,
    refresh: bool,
) -> Result<()> {
    let (tokens, _) = token_service(config_path)?;
    let kind = if refresh {
        TokenKind::Refresh
    } else {
        TokenKind::Access
    };

    let issued = tokens.issue(&Identity::new(user_id, role), kind)?;
    tracing::debug!(?kind, expires_at = %issued.expires_at, "Issued token");

    ui::raw(&issued.token);
    Ok(())
}

/// Verify a token and print its identity and expiry, or why it failed.
pub fn run_inspect_token(
    config_path: Option<&Path>,
    token: &str,
    threshold_secs: Option<u64>,
) -> Result<()> {
    let (tokens, default_threshold) = token_service(config_path)?;
    let threshold = threshold_secs.map_or(default_threshold, Duration::from_secs);
    let now = Utc::now().timestamp();

    let expiring_soon = tokens.is_expiring_soon_at(token, threshold, now);

    match tokens.decode_at(token, now) {
        Ok(claims) => {
            ui::success("Token is valid");
            ui::kv("User ID", &claims.user_id);
            ui::kv("Role", claims.role.as_str());
            ui::kv("Issued", &format_timestamp(claims.iat));
            ui::kv("Expires", &format_timestamp(claims.exp));
            ui::kv("Expiring soon", &expiring_soon.to_string());
            Ok(())
        }
        Err(e) => {
            ui::error(&format!("Token rejected: {}", describe(e)));
            ui::kv("Expiring soon", &expiring_soon.to_string());
            Err(e.into())
        }
    }
}

const fn describe(error: TokenError) -> &'static str {
    match error {
        TokenError::Expired => "expired",
        TokenError::Invalid => "invalid signature or algorithm",
        TokenError::Malformed => "malformed",
    }
}

fn format_timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map_or_else(|| secs.to_string(), |t| t.to_rfc3339())
}
