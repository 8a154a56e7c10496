//! Credential model and refresh state machine
//!
//! One `Credentials` struct carries the fields every OAuth2 variant shares;
//! `CredentialKind` is the closed set of variants and holds whatever is
//! specific to each (signing key, assertion generator). Refresh and revoke
//! mutate the credential in place.
//!
//! States:
//! - `Fresh`: access token present and `token_expiry` in the future
//! - `Expired`: expiry passed (`expiry <= now`, no grace period) or unknown
//! - `Invalid`: revoked, or no access token and no way to get one (terminal)
//!
//! Refresh takes `&mut self`, so one in-memory credential cannot be refreshed
//! from two places at once. Callers sharing one credential across tasks wrap
//! it in `SharedCredentials`, which serializes refreshes behind a mutex.
//! Persistence is not handled here; see `StoredCredentials`.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{NaiveDateTime, Utc};
use common::Secret;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::assertion::AssertionGrant;
use crate::codec::{CredentialClass, CredentialCodec};
use crate::constants::{DEFAULT_TOKEN_LIFETIME, GOOGLE_REVOKE_URI, GOOGLE_TOKEN_URI, JWT_BEARER_GRANT_TYPE};
use crate::error::{Error, Result};
use crate::helpers::add_query_parameter;
use crate::http::{HttpRequest, HttpRequester};
use crate::service_account::ServiceAccount;
use crate::token::{TokenResponse, error_message, form_request};

/// Validity of the access token at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Fresh,
    Expired,
    Invalid,
}

/// Variant-specific part of a credential.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialKind {
    /// Three-legged user credentials refreshed with a refresh token.
    OAuth2,
    /// User credentials loaded from an `authorized_user` file.
    Google,
    /// A bare access token. Never refreshable.
    AccessToken,
    /// Refreshes with a JWT signed by the account's private key.
    ServiceAccount(ServiceAccount),
    /// Refreshes with an assertion from a caller-supplied generator.
    Assertion(AssertionGrant),
}

/// An OAuth2 access/refresh token pair and everything needed to renew it.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<Secret<String>>,
    pub refresh_token: Option<String>,
    /// UTC, no timezone attached.
    pub token_expiry: Option<NaiveDateTime>,
    pub token_uri: String,
    pub revoke_uri: Option<String>,
    pub user_agent: Option<String>,
    pub scopes: BTreeSet<String>,
    /// Claims of the last `id_token`, unverified.
    pub id_token: Option<Value>,
    /// Last raw token endpoint response.
    pub token_response: Option<Value>,
    /// Set by revocation.
    pub invalid: bool,
    pub kind: CredentialKind,
}

#[derive(Deserialize)]
struct AuthorizedUserFile {
    #[serde(rename = "type")]
    file_type: Option<String>,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default)]
    token_uri: Option<String>,
}

impl Credentials {
    fn blank(kind: CredentialKind, token_uri: String) -> Self {
        Self {
            access_token: None,
            client_id: None,
            client_secret: None,
            refresh_token: None,
            token_expiry: None,
            token_uri,
            revoke_uri: Some(GOOGLE_REVOKE_URI.into()),
            user_agent: None,
            scopes: BTreeSet::new(),
            id_token: None,
            token_response: None,
            invalid: false,
            kind,
        }
    }

    /// Three-legged user credentials.
    ///
    /// A refresh token requires a non-empty `token_uri`.
    pub fn oauth2(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: Option<String>,
        token_uri: impl Into<String>,
    ) -> Result<Self> {
        Self::user(CredentialKind::OAuth2, client_id, client_secret, refresh_token, token_uri)
    }

    /// Same shape as [`Credentials::oauth2`], tagged as `GoogleCredentials`.
    pub fn google(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: Option<String>,
        token_uri: impl Into<String>,
    ) -> Result<Self> {
        Self::user(CredentialKind::Google, client_id, client_secret, refresh_token, token_uri)
    }

    fn user(
        kind: CredentialKind,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: Option<String>,
        token_uri: impl Into<String>,
    ) -> Result<Self> {
        let token_uri = token_uri.into();
        if refresh_token.is_some() && token_uri.is_empty() {
            return Err(Error::Configuration(
                "a refresh token requires a token_uri".into(),
            ));
        }
        let mut credentials = Self::blank(kind, token_uri);
        credentials.client_id = Some(client_id.into());
        credentials.client_secret = Some(Secret::new(client_secret.into()));
        credentials.refresh_token = refresh_token;
        Ok(credentials)
    }

    /// A caller-supplied access token with no means of refreshing it.
    pub fn access_token(access_token: impl Into<String>, user_agent: Option<String>) -> Self {
        let mut credentials = Self::blank(CredentialKind::AccessToken, String::new());
        credentials.access_token = Some(access_token.into());
        credentials.user_agent = user_agent;
        credentials
    }

    pub fn service_account(account: ServiceAccount, token_uri: impl Into<String>) -> Self {
        Self::blank(CredentialKind::ServiceAccount(account), token_uri.into())
    }

    pub fn assertion(grant: AssertionGrant, token_uri: impl Into<String>) -> Self {
        Self::blank(CredentialKind::Assertion(grant), token_uri.into())
    }

    /// `GoogleCredentials` from an `"type": "authorized_user"` document.
    pub fn from_authorized_user_info(info: &Value) -> Result<Self> {
        let file: AuthorizedUserFile = serde_json::from_value(info.clone())
            .map_err(|e| Error::Configuration(format!("invalid authorized user info: {e}")))?;
        if file.file_type.as_deref().is_some_and(|t| t != "authorized_user") {
            return Err(Error::Configuration(format!(
                "expected an \"authorized_user\" file, got {:?}",
                file.file_type.unwrap_or_default()
            )));
        }
        Self::google(
            file.client_id,
            file.client_secret,
            Some(file.refresh_token),
            file.token_uri.unwrap_or_else(|| GOOGLE_TOKEN_URI.into()),
        )
    }

    pub async fn from_authorized_user_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read(path).await?;
        let info: Value = serde_json::from_slice(&contents).map_err(|e| {
            Error::Configuration(format!("{} is not JSON: {e}", path.display()))
        })?;
        Self::from_authorized_user_info(&info)
    }

    pub fn with_access_token(
        mut self,
        access_token: impl Into<String>,
        token_expiry: Option<NaiveDateTime>,
    ) -> Self {
        self.access_token = Some(access_token.into());
        self.token_expiry = token_expiry;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_revoke_uri(mut self, revoke_uri: impl Into<String>) -> Self {
        self.revoke_uri = Some(revoke_uri.into());
        self
    }

    /// Variant tag used in the serialized representation.
    pub fn class(&self) -> CredentialClass {
        match self.kind {
            CredentialKind::OAuth2 => CredentialClass::OAuth2,
            CredentialKind::Google => CredentialClass::Google,
            CredentialKind::AccessToken => CredentialClass::AccessToken,
            CredentialKind::ServiceAccount(_) => CredentialClass::ServiceAccount,
            CredentialKind::Assertion(_) => CredentialClass::Assertion,
        }
    }

    /// Whether a refresh can be attempted at all.
    pub fn is_refreshable(&self) -> bool {
        if self.invalid {
            return false;
        }
        match self.kind {
            CredentialKind::OAuth2 | CredentialKind::Google => {
                self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
            }
            CredentialKind::AccessToken => false,
            CredentialKind::ServiceAccount(_) | CredentialKind::Assertion(_) => true,
        }
    }

    pub fn state(&self) -> TokenState {
        self.state_at(Utc::now().naive_utc())
    }

    /// Token state at `now`.
    ///
    /// A missing expiry counts as expired, except for bare access tokens,
    /// whose lifetime the caller simply does not know.
    pub fn state_at(&self, now: NaiveDateTime) -> TokenState {
        if self.invalid {
            return TokenState::Invalid;
        }
        if self.access_token.as_deref().is_none_or(str::is_empty) {
            return if self.is_refreshable() {
                TokenState::Expired
            } else {
                TokenState::Invalid
            };
        }
        match (&self.kind, self.token_expiry) {
            (CredentialKind::AccessToken, None) => TokenState::Fresh,
            (_, None) => TokenState::Expired,
            (_, Some(expiry)) if expiry <= now => TokenState::Expired,
            (_, Some(_)) => TokenState::Fresh,
        }
    }

    pub fn access_token_expired(&self) -> bool {
        self.state() != TokenState::Fresh
    }

    /// Refresh if the token is not fresh. Issues no request when it is.
    pub async fn ensure_valid<H: HttpRequester + ?Sized>(&mut self, http: &H) -> Result<()> {
        match self.state() {
            TokenState::Fresh => Ok(()),
            TokenState::Invalid if self.invalid => Err(Error::NonRefreshable(
                "credentials have been revoked".into(),
            )),
            TokenState::Invalid | TokenState::Expired => self.refresh(http).await,
        }
    }

    /// Unconditionally fetch a new access token from `token_uri`.
    ///
    /// On failure the credential is left untouched, so retrying is safe.
    pub async fn refresh<H: HttpRequester + ?Sized>(&mut self, http: &H) -> Result<()> {
        let request = self.refresh_request(Utc::now().naive_utc())?;
        debug!(token_uri = %self.token_uri, class = self.class().tag(), "refreshing access token");

        let response = http.request(request).await?;
        let token = match TokenResponse::parse(response.status, &response.body) {
            Ok(token) => token,
            Err(e) => {
                warn!(token_uri = %self.token_uri, error = %e, "token refresh failed");
                return Err(e);
            }
        };

        self.apply_token_response(token, Utc::now().naive_utc());
        info!(token_uri = %self.token_uri, class = self.class().tag(), "access token refreshed");
        Ok(())
    }

    /// Token endpoint request for this variant's grant.
    pub fn refresh_request(&self, now: NaiveDateTime) -> Result<HttpRequest> {
        if self.invalid {
            return Err(Error::NonRefreshable("credentials have been revoked".into()));
        }
        let user_agent = self.user_agent.as_deref();

        match &self.kind {
            CredentialKind::OAuth2 | CredentialKind::Google => {
                let refresh_token = self
                    .refresh_token
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| Error::NonRefreshable("no refresh token".into()))?;
                let client_id = self.client_id.as_deref().unwrap_or_default();
                let client_secret = self
                    .client_secret
                    .as_ref()
                    .map(|s| s.expose().as_str())
                    .unwrap_or_default();
                Ok(form_request(
                    &self.token_uri,
                    &[
                        ("grant_type", "refresh_token"),
                        ("client_id", client_id),
                        ("client_secret", client_secret),
                        ("refresh_token", refresh_token),
                    ],
                    user_agent,
                ))
            }
            CredentialKind::AccessToken => Err(Error::NonRefreshable(
                "access token credentials cannot be refreshed".into(),
            )),
            CredentialKind::ServiceAccount(account) => {
                let assertion = account.generate_assertion(&self.token_uri, &self.scopes, now)?;
                Ok(form_request(
                    &self.token_uri,
                    &[("grant_type", JWT_BEARER_GRANT_TYPE), ("assertion", &assertion)],
                    user_agent,
                ))
            }
            CredentialKind::Assertion(grant) => {
                let generator = grant.generator();
                let assertion = generator.generate_assertion(now)?;
                Ok(form_request(
                    &self.token_uri,
                    &[
                        ("grant_type", generator.assertion_type()),
                        ("assertion", &assertion),
                    ],
                    user_agent,
                ))
            }
        }
    }

    /// Store a successful token response.
    pub fn apply_token_response(&mut self, token: TokenResponse, now: NaiveDateTime) {
        self.token_expiry = Some(token.expiry_from(now, DEFAULT_TOKEN_LIFETIME));
        if let Some(claims) = token.decoded_id_token() {
            self.id_token = Some(claims);
        }
        self.access_token = Some(token.access_token);
        if let Some(refresh_token) = token.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        self.token_response = Some(token.raw);
        self.invalid = false;
    }

    /// Revoke the refresh token (or the access token if there is none) and
    /// clear both. A server reporting `invalid_token` counts as success.
    pub async fn revoke<H: HttpRequester + ?Sized>(&mut self, http: &H) -> Result<()> {
        let token = self
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.access_token.as_deref().filter(|t| !t.is_empty()));

        if let Some(token) = token {
            let revoke_uri = self.revoke_uri.as_deref().unwrap_or(GOOGLE_REVOKE_URI);
            let uri = add_query_parameter(revoke_uri, "token", Some(token));
            let response = http.request(HttpRequest::get(uri)).await?;

            let status = response.status;
            let already_revoked = status.is_client_error()
                && serde_json::from_slice::<Value>(&response.body)
                    .ok()
                    .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_owned))
                    .is_some_and(|error| error == "invalid_token");

            if !status.is_success() && !already_revoked {
                let message = error_message(&response.body);
                warn!(revoke_uri, status = status.as_u16(), error = %message, "token revocation failed");
                return Err(Error::Revoke {
                    status: status.as_u16(),
                    message,
                });
            }
            if already_revoked {
                debug!(revoke_uri, "token was already revoked");
            }
        }

        self.access_token = None;
        self.refresh_token = None;
        self.invalid = true;
        info!(class = self.class().tag(), "credentials revoked");
        Ok(())
    }

    /// Set `Authorization: Bearer <token>` and the configured user agent.
    ///
    /// Does not check expiry; use `StoredCredentials::apply` for that.
    pub fn apply_headers(&self, headers: &mut HeaderMap) -> Result<()> {
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| Error::NonRefreshable("no access token to apply".into()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::Configuration(format!("access token is not valid header text: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);

        if let Some(user_agent) = &self.user_agent {
            let combined = match headers.get(USER_AGENT).and_then(|v| v.to_str().ok()) {
                Some(existing) => format!("{user_agent} {existing}"),
                None => user_agent.clone(),
            };
            if let Ok(value) = HeaderValue::from_str(&combined) {
                headers.insert(USER_AGENT, value);
            }
        }
        Ok(())
    }

    /// Serialize with the default codec.
    pub fn to_json(&self) -> Result<String> {
        CredentialCodec::default().encode(self)
    }

    /// Deserialize with the default codec (no custom assertion kinds).
    pub fn from_json(json: &str) -> Result<Self> {
        CredentialCodec::default().decode(json)
    }
}
