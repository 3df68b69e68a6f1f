//! Transit CLI - run the user service and work with credentials and tokens.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use transit_core::Role;
use transit_core::password::DEFAULT_GENERATED_LENGTH;

#[derive(Parser)]
#[command(name = "transit")]
#[command(about = "Transit - user authentication service")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to ~/.transit/transit.json)
    #[arg(short, long, global = true, env = "TRANSIT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP user service
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        bind: Option<String>,

        /// Data directory for the user database
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Hash a password with the configured cost
    HashPassword {
        /// Password to hash (prompted if omitted)
        password: Option<String>,
    },

    /// Check a password against the strength policy
    CheckPassword {
        /// Password to check
        password: String,
    },

    /// Generate a random password that satisfies the strength policy
    GeneratePassword {
        /// Length (values below 8 are raised to 8)
        #[arg(short, long, default_value_t = DEFAULT_GENERATED_LENGTH)]
        length: usize,
    },

    /// Create a user account directly in the user database
    CreateUser {
        /// Login email
        #[arg(long)]
        email: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Role: passenger, admin, or staff
        #[arg(long, default_value = "passenger")]
        role: Role,

        /// Password (a random one is generated if omitted)
        #[arg(long)]
        password: Option<String>,

        /// Contact number
        #[arg(long)]
        contact_number: Option<String>,

        /// Data directory override
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Issue a signed token for an identity
    IssueToken {
        /// User ID to embed
        #[arg(long)]
        user_id: String,

        /// Role to embed
        #[arg(long, default_value = "passenger")]
        role: Role,

        /// Issue a refresh token instead of an access token
        #[arg(long)]
        refresh: bool,
    },

    /// Verify a token and show what it carries
    InspectToken {
        /// Token to inspect
        token: String,

        /// Expiring-soon threshold in seconds (defaults to config)
        #[arg(long)]
        threshold_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Serve {
            port,
            bind,
            data_dir,
        } => {
            let args = commands::serve::ServeArgs {
                port,
                bind,
                data_dir,
            };
            commands::run_serve(config_path, args).await?;
        }

        Commands::HashPassword { password } => {
            commands::run_hash_password(config_path, password).await?;
        }

        Commands::CheckPassword { password } => {
            commands::run_check_password(&password)?;
        }

        Commands::GeneratePassword { length } => {
            commands::run_generate_password(length);
        }

        Commands::CreateUser {
            email,
            name,
            role,
            password,
            contact_number,
            data_dir,
        } => {
            let args = commands::users::CreateUserArgs {
                email,
                name,
                role,
                password,
                contact_number,
                data_dir,
            };
            commands::run_create_user(config_path, args).await?;
        }

        Commands::IssueToken {
            user_id,
            role,
            refresh,
        } => {
            commands::run_issue_token(config_path, user_id, role, refresh)?;
        }

        Commands::InspectToken {
            token,
            threshold_secs,
        } => {
            commands::run_inspect_token(config_path, &token, threshold_secs)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_create_user() {
        let cli = Cli::parse_from([
            "transit",
            "create-user",
            "--email",
            "ops@example.com",
            "--name",
            "Ops",
            "--role",
            "staff",
        ]);

        match cli.command {
            Commands::CreateUser {
                email,
                role,
                password,
                ..
            } => {
                assert_eq!(email, "ops@example.com");
                assert_eq!(role, Role::Staff);
                assert!(password.is_none());
            }
            _ => panic!("expected create-user"),
        }
    }

    #[test]
    fn test_rejects_unknown_role() {
        let result = Cli::try_parse_from([
            "transit",
            "issue-token",
            "--user-id",
            "u1",
            "--role",
            "driver",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_generate_password_default_length() {
        let cli = Cli::parse_from(["transit", "generate-password"]);
        assert!(matches!(
            cli.command,
            Commands::GeneratePassword { length: DEFAULT_GENERATED_LENGTH }
        ));
    }
}
