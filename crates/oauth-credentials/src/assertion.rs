//! Assertion grants: credentials that refresh themselves by presenting a
//! signed statement to the token endpoint instead of a refresh token.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::Value;

use crate::constants::JWT_BEARER_GRANT_TYPE;
use crate::error::Result;
use crate::helpers::{json_encode, urlsafe_b64encode};

/// Produces a fresh assertion for every refresh.
///
/// `kind` names the generator in serialized credentials; decoding looks it up
/// in the codec's registry, so a generator must be registered under the same
/// kind before stored credentials using it can be read back.
pub trait AssertionGenerator: Send + Sync + fmt::Debug {
    fn kind(&self) -> &str;

    /// Value sent as `grant_type`.
    fn assertion_type(&self) -> &str {
        JWT_BEARER_GRANT_TYPE
    }

    fn generate_assertion(&self, now: NaiveDateTime) -> Result<String>;

    /// Everything needed to rebuild this generator.
    fn to_json(&self) -> Value;
}

/// Shared handle to an assertion generator.
#[derive(Clone, Debug)]
pub struct AssertionGrant(Arc<dyn AssertionGenerator>);

impl AssertionGrant {
    pub fn new(generator: impl AssertionGenerator + 'static) -> Self {
        Self(Arc::new(generator))
    }

    pub fn from_arc(generator: Arc<dyn AssertionGenerator>) -> Self {
        Self(generator)
    }

    pub fn generator(&self) -> &dyn AssertionGenerator {
        self.0.as_ref()
    }
}

impl PartialEq for AssertionGrant {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind() && self.0.to_json() == other.0.to_json()
    }
}

/// Assemble `header.claims.signature` with unpadded base64url segments.
///
/// Header and claims go through [`json_encode`] so the signed bytes are
/// reproducible for a given input.
pub(crate) fn encode_jwt<F>(header: &Value, claims: &Value, sign: F) -> Result<String>
where
    F: FnOnce(&[u8]) -> Result<Vec<u8>>,
{
    let signing_input = format!(
        "{}.{}",
        urlsafe_b64encode(json_encode(header)?),
        urlsafe_b64encode(json_encode(claims)?)
    );
    let signature = sign(signing_input.as_bytes())?;
    Ok(format!("{signing_input}.{}", urlsafe_b64encode(signature)))
}
