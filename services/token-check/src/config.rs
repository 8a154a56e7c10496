//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. Key file paths and
//! the expected user email can come from either source; all three are
//! required before any check runs.

use oauth_credentials::constants::GOOGLE_USERINFO_URI;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const JSON_KEY_PATH_ENV: &str = "TOKEN_CHECK_JSON_KEY_PATH";
const USER_KEY_PATH_ENV: &str = "TOKEN_CHECK_USER_KEY_PATH";
const USER_KEY_EMAIL_ENV: &str = "TOKEN_CHECK_USER_KEY_EMAIL";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub check: CheckConfig,
    #[serde(default)]
    pub service_account: ServiceAccountConfig,
    #[serde(default)]
    pub user: UserConfig,
}

/// Settings shared by every check
#[derive(Debug, Deserialize)]
pub struct CheckConfig {
    #[serde(default = "default_userinfo_uri")]
    pub userinfo_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// When set, refreshed credentials are written here, one file per check.
    #[serde(default)]
    pub credentials_dir: Option<PathBuf>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            userinfo_uri: default_userinfo_uri(),
            scopes: default_scopes(),
            user_agent: default_user_agent(),
            credentials_dir: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceAccountConfig {
    #[serde(default)]
    pub json_key_path: Option<PathBuf>,
}

/// Authorized-user key file and the account it belongs to
#[derive(Debug, Default, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default)]
    pub email: Option<String>,
}

fn default_userinfo_uri() -> String {
    GOOGLE_USERINFO_URI.into()
}

fn default_scopes() -> Vec<String> {
    [
        "https://www.googleapis.com/auth/plus.login",
        "https://www.googleapis.com/auth/plus.me",
        "https://www.googleapis.com/auth/userinfo.email",
        "https://www.googleapis.com/auth/userinfo.profile",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_user_agent() -> String {
    concat!("token-check/", env!("CARGO_PKG_VERSION")).into()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.finish()
    }

    /// Defaults plus environment variables, for running without a file.
    pub fn from_env() -> common::Result<Self> {
        Config::default().finish()
    }

    fn finish(mut self) -> common::Result<Self> {
        if let Ok(path) = std::env::var(JSON_KEY_PATH_ENV) {
            self.service_account.json_key_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var(USER_KEY_PATH_ENV) {
            self.user.key_path = Some(PathBuf::from(path));
        }
        if let Ok(email) = std::env::var(USER_KEY_EMAIL_ENV) {
            self.user.email = Some(email);
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.check.userinfo_uri.starts_with("http://")
            && !self.check.userinfo_uri.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "userinfo_uri must start with http:// or https://, got: {}",
                self.check.userinfo_uri
            )));
        }
        if self.check.scopes.is_empty() {
            return Err(common::Error::Config("scopes must not be empty".into()));
        }

        require_file(
            self.service_account.json_key_path.as_deref(),
            "service_account.json_key_path",
            JSON_KEY_PATH_ENV,
        )?;
        require_file(self.user.key_path.as_deref(), "user.key_path", USER_KEY_PATH_ENV)?;

        match self.user.email.as_deref() {
            Some(email) if !email.trim().is_empty() => Ok(()),
            _ => Err(common::Error::Config(format!(
                "user.email is not set (config file or {USER_KEY_EMAIL_ENV})"
            ))),
        }
    }

    pub fn json_key_path(&self) -> &Path {
        self.service_account.json_key_path.as_deref().unwrap_or(Path::new(""))
    }

    pub fn user_key_path(&self) -> &Path {
        self.user.key_path.as_deref().unwrap_or(Path::new(""))
    }

    pub fn user_email(&self) -> &str {
        self.user.email.as_deref().unwrap_or_default()
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("token-check.toml")
    }
}

fn require_file(path: Option<&Path>, field: &str, env: &str) -> common::Result<()> {
    let Some(path) = path else {
        return Err(common::Error::Config(format!(
            "{field} is not set (config file or {env})"
        )));
    };
    if !path.is_file() {
        return Err(common::Error::Config(format!(
            "{field} does not point to a file: {}",
            path.display()
        )));
    }
    Ok(())
}
