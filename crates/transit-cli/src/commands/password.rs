//! Password commands - hash, check, and generate.

use std::path::Path;

use anyhow::{Context, Result};
use transit_core::{CredentialHasher, generate_random_password, meets_strength_policy};

use crate::ui;

/// Hash a password with the configured Argon2 cost and print the PHC string.
pub async fn run_hash_password(config_path: Option<&Path>, password: Option<String>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let hasher = CredentialHasher::new(&config.auth.hashing)
        .context("Invalid hashing parameters")?;

    let password = match password {
        Some(p) => p,
        None => ui::new_password("Password")?,
    };

    if !meets_strength_policy(&password) {
        ui::warning("Password does not meet the strength policy");
    }

    let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .context("Hashing task failed")??;

    ui::raw(&hash);
    Ok(())
}

/// Check a password against the strength policy.
///
/// Fails (non-zero exit) if the password is too weak.
pub fn run_check_password(password: &str) -> Result<()> {
    if meets_strength_policy(password) {
        ui::success("Password meets the strength policy");
        Ok(())
    } else {
        ui::error("Password does not meet the strength policy");
        ui::info(
            "Use 8+ characters with upper and lower case letters, a digit and one of !@#$%^&*",
        );
        anyhow::bail!("weak password")
    }
}

/// Print a freshly generated password.
pub fn run_generate_password(length: usize) {
    ui::raw(&generate_random_password(length));
}
