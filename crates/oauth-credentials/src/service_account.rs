//! Service-account credentials
//!
//! A service account proves its identity with an RS256-signed JWT instead of
//! a refresh token. The key comes from the JSON key file downloaded from the
//! provider's console (`"type": "service_account"`). PKCS#12 bundles have to
//! be converted to PKCS#8 PEM before they reach this module.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::NaiveDateTime;
use common::Secret;
use ring::rand::SystemRandom;
use ring::signature::{RSA_PKCS1_SHA256, RsaKeyPair};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::assertion::encode_jwt;
use crate::constants::{GOOGLE_REVOKE_URI, GOOGLE_TOKEN_URI, MAX_ASSERTION_LIFETIME};
use crate::credentials::{CredentialKind, Credentials};
use crate::error::{Error, Result};
use crate::helpers::{from_bytes, parse_pem_key, scopes_to_string};

/// Signing identity of a service account.
#[derive(Clone)]
pub struct ServiceAccount {
    email: String,
    private_key_id: Option<String>,
    private_key_pem: Secret<String>,
    subject: Option<String>,
    key_pair: Arc<RsaKeyPair>,
}

impl ServiceAccount {
    /// Parse a PEM private key (`PRIVATE KEY` or `RSA PRIVATE KEY`).
    pub fn from_pem(
        email: impl Into<String>,
        private_key_pem: impl Into<String>,
        private_key_id: Option<String>,
    ) -> Result<Self> {
        let private_key_pem = private_key_pem.into();
        let key_pair = load_key_pair(&private_key_pem)?;
        Ok(Self {
            email: email.into(),
            private_key_id,
            private_key_pem: Secret::new(private_key_pem),
            subject: None,
            key_pair: Arc::new(key_pair),
        })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn private_key_id(&self) -> Option<&str> {
        self.private_key_id.as_deref()
    }

    pub fn private_key_pem(&self) -> &str {
        self.private_key_pem.expose()
    }

    /// User impersonated through domain-wide delegation, if any.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn with_subject(mut self, subject: Option<String>) -> Self {
        self.subject = subject;
        self
    }

    /// RSASSA-PKCS1-v1_5 with SHA-256.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let mut signature = vec![0; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(&RSA_PKCS1_SHA256, &SystemRandom::new(), message, &mut signature)
            .map_err(|_| Error::Configuration("RSA signing failed".into()))?;
        Ok(signature)
    }

    /// Signed JWT for the `jwt-bearer` grant, valid from `now` for one hour.
    pub fn generate_assertion(
        &self,
        token_uri: &str,
        scopes: &BTreeSet<String>,
        now: NaiveDateTime,
    ) -> Result<String> {
        let mut header = Map::new();
        header.insert("alg".into(), json!("RS256"));
        header.insert("typ".into(), json!("JWT"));
        if let Some(kid) = &self.private_key_id {
            header.insert("kid".into(), json!(kid));
        }

        let issued_at = now.and_utc().timestamp();
        let mut claims = Map::new();
        claims.insert("iss".into(), json!(self.email));
        claims.insert("scope".into(), json!(scopes_to_string(scopes)));
        claims.insert("aud".into(), json!(token_uri));
        claims.insert("iat".into(), json!(issued_at));
        claims.insert(
            "exp".into(),
            json!(issued_at + MAX_ASSERTION_LIFETIME.as_secs() as i64),
        );
        if let Some(subject) = &self.subject {
            claims.insert("sub".into(), json!(subject));
        }

        encode_jwt(&Value::Object(header), &Value::Object(claims), |input| {
            self.sign(input)
        })
    }

    #[cfg(test)]
    pub(crate) fn public_key_der(&self) -> Vec<u8> {
        use ring::signature::KeyPair;
        self.key_pair.public_key().as_ref().to_vec()
    }
}

impl PartialEq for ServiceAccount {
    fn eq(&self, other: &Self) -> bool {
        self.email == other.email
            && self.private_key_id == other.private_key_id
            && self.private_key_pem == other.private_key_pem
            && self.subject == other.subject
    }
}

impl fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("email", &self.email)
            .field("private_key_id", &self.private_key_id)
            .field("private_key_pem", &self.private_key_pem)
            .field("subject", &self.subject)
            .finish()
    }
}

/// Fields of a JSON service-account key file.
#[derive(Deserialize)]
struct KeyFile {
    #[serde(rename = "type")]
    key_type: Option<String>,
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    revoke_uri: Option<String>,
}

impl Credentials {
    /// Service-account credentials from an already-parsed key file.
    pub fn from_json_keyfile_dict<I, S>(info: &Value, scopes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key: KeyFile = serde_json::from_value(info.clone())
            .map_err(|e| Error::Configuration(format!("invalid service account key: {e}")))?;
        if key.key_type.as_deref() != Some("service_account") {
            return Err(Error::Configuration(format!(
                "expected a \"service_account\" key file, got {:?}",
                key.key_type.unwrap_or_default()
            )));
        }

        let account = ServiceAccount::from_pem(key.client_email, key.private_key, key.private_key_id)?;
        let mut credentials = Credentials::service_account(
            account,
            key.token_uri.unwrap_or_else(|| GOOGLE_TOKEN_URI.into()),
        );
        credentials.client_id = key.client_id;
        credentials.revoke_uri = Some(key.revoke_uri.unwrap_or_else(|| GOOGLE_REVOKE_URI.into()));
        credentials.scopes = scopes.into_iter().map(Into::into).collect();
        Ok(credentials)
    }

    /// Service-account credentials from a JSON key file on disk.
    pub async fn from_json_keyfile_name<I, S>(path: impl AsRef<Path>, scopes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let path = path.as_ref();
        let contents = tokio::fs::read(path).await?;
        let info: Value = serde_json::from_slice(&contents).map_err(|e| {
            Error::Configuration(format!("{} is not a JSON key file: {e}", path.display()))
        })?;
        Self::from_json_keyfile_dict(&info, scopes)
    }

    /// Copy with a different scope set and no cached access token.
    pub fn create_scoped<I, S>(&self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut scoped = self.without_token();
        scoped.scopes = scopes.into_iter().map(Into::into).collect();
        scoped
    }

    /// Copy of a service account acting on behalf of `subject`.
    pub fn create_delegated(&self, subject: impl Into<String>) -> Result<Self> {
        let CredentialKind::ServiceAccount(account) = &self.kind else {
            return Err(Error::Configuration(format!(
                "{} cannot be delegated",
                self.class().tag()
            )));
        };
        let mut delegated = self.without_token();
        delegated.kind =
            CredentialKind::ServiceAccount(account.clone().with_subject(Some(subject.into())));
        Ok(delegated)
    }

    fn without_token(&self) -> Self {
        let mut copy = self.clone();
        copy.access_token = None;
        copy.token_expiry = None;
        copy.id_token = None;
        copy.token_response = None;
        copy
    }
}

fn load_key_pair(pem: &str) -> Result<RsaKeyPair> {
    let pem = parse_pem_key(pem.as_bytes())
        .ok_or_else(|| Error::Configuration("private key is not PEM encoded".into()))?;
    let pem = from_bytes(pem)?;

    let mut lines = pem.lines().map(str::trim);
    let begin = lines.next().unwrap_or_default();
    let body: String = lines
        .take_while(|line| !line.starts_with("-----END"))
        .collect();
    let der = STANDARD
        .decode(body)
        .map_err(|e| Error::Configuration(format!("private key is not valid base64: {e}")))?;

    let parsed = if begin.contains("RSA PRIVATE KEY") {
        RsaKeyPair::from_der(&der)
    } else {
        RsaKeyPair::from_pkcs8(&der)
    };
    parsed.map_err(|e| Error::Configuration(format!("private key rejected: {e}")))
}
