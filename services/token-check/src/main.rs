//! Credential smoke test
//!
//! Loads a service account key and an authorized-user file, obtains access
//! tokens for both and confirms each one against the userinfo endpoint:
//! 1. Service account: the reported email must be the account's own
//! 2. Authorized user: the reported email must match `user.email`

mod check;
mod config;

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting token-check");

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    let config = if cli_config_path.is_some() || config_path.exists() {
        info!(path = %config_path.display(), "loading configuration");
        Config::load(&config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?
    } else {
        info!("no config file, using environment");
        Config::from_env().context("failed to load config from environment")?
    };

    info!(
        userinfo_uri = %config.check.userinfo_uri,
        scopes = config.check.scopes.len(),
        persist = config.check.credentials_dir.is_some(),
        "configuration loaded"
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;

    check::run_service_account(&config, &client)
        .await
        .context("service account check failed")?;
    check::run_user(&config, &client)
        .await
        .context("authorized user check failed")?;

    info!("all checks passed");
    Ok(())
}
