//! Errors from loading the token-check configuration
//!
//! The credential library reports its own failures through
//! `oauth_credentials::Error`. This type covers what happens before any
//! credential exists: reading the TOML file, applying environment overrides
//! and checking that key file paths point at files.

use thiserror::Error;

/// Errors raised while loading external configuration (config files,
/// environment variables, key file paths) before any credential work starts.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias for configuration loading.
pub type Result<T> = std::result::Result<T, Error>;
