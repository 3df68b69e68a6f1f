//! CLI command implementations.

pub mod password;
pub mod serve;
pub mod token;
pub mod users;

use std::path::Path;

use anyhow::Context;
use transit_core::Config;

pub use password::{run_check_password, run_generate_password, run_hash_password};
pub use serve::run_serve;
pub use token::{run_inspect_token, run_issue_token};
pub use users::run_create_user;

/// Load config from `path` or the default location, with env overrides.
fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    Config::resolve(path).with_context(|| match path {
        Some(p) => format!("Failed to load config from {}", p.display()),
        None => format!(
            "Failed to load config from {}",
            Config::default_path().display()
        ),
    })
}
