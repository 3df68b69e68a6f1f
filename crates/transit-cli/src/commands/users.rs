//! User commands - create accounts without going through HTTP.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use transit_core::password::DEFAULT_GENERATED_LENGTH;
use transit_core::{Role, SigningSecret, generate_random_password};
use transit_gateway::auth::{AuthError, CreateUser, TokenService};
use transit_gateway::{GatewayBuilder, GatewayConfig};

use crate::ui;

/// Arguments for `create-user`.
#[derive(Debug, Clone)]
pub struct CreateUserArgs {
    /// Login email.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Role to assign.
    pub role: Role,
    /// Password; generated when absent.
    pub password: Option<String>,
    /// Contact number.
    pub contact_number: Option<String>,
    /// Data directory override.
    pub data_dir: Option<PathBuf>,
}

/// Create a user with an explicit role.
///
/// This is the only way to create the first admin.
pub async fn run_create_user(config_path: Option<&Path>, args: CreateUserArgs) -> Result<()> {
    let mut config = super::load_config(config_path)?;
    if args.data_dir.is_some() {
        config.server.data_dir = args.data_dir;
    }

    // Account creation never signs tokens, so a throwaway key is enough
    let tokens = TokenService::new(
        &SigningSecret::generate(),
        config.auth.access_token_expiry(),
        config.auth.refresh_token_expiry(),
    );

    let gateway = GatewayBuilder::new()
        .with_config(GatewayConfig::from(&config))
        .with_token_service(Arc::new(tokens))
        .build()
        .context("Failed to open user database (is the server running?)")?;

    let generated = args.password.is_none();
    let password = args
        .password
        .unwrap_or_else(|| generate_random_password(DEFAULT_GENERATED_LENGTH));

    let input = CreateUser {
        name: args.name,
        email: args.email,
        password: password.clone(),
        role: Some(args.role),
        contact_number: args.contact_number,
    };

    match gateway.state().users.create_user(input, args.role).await {
        Ok(user) => {
            ui::success(&format!(
                "Created user '{}' with role '{}'",
                user.email, user.role
            ));
            ui::kv("ID", &user.id);
            if generated {
                ui::kv("Password", &password);
                ui::warning("Store this password now; it cannot be shown again");
            }
            Ok(())
        }
        Err(AuthError::UserExists) => {
            ui::error("A user with that email already exists");
            anyhow::bail!(AuthError::UserExists)
        }
        Err(e) => Err(e).context("Failed to create user"),
    }
}
