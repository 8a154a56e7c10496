//! Types shared by the credential library and the token-check service
//!
//! - [`Secret`]: redacting holder for client secrets and private keys
//! - [`Error`]: configuration loading failures (`Config`, `Io`, `Toml`)

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
