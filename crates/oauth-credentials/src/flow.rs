//! Three-legged web-server flow
//!
//! Step 1 builds the URL the user opens to grant consent. The browser round
//! trip happens outside this crate; the caller receives the authorization
//! code on its redirect URI and hands it to step 2, which exchanges it for
//! `OAuth2Credentials`.

use std::path::Path;

use chrono::Utc;
use common::Secret;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::constants::{GOOGLE_AUTH_URI, GOOGLE_REVOKE_URI, GOOGLE_TOKEN_URI, OOB_CALLBACK_URN};
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::helpers::{add_query_parameter, scopes_to_string};
use crate::http::HttpRequester;
use crate::pkce::{compute_challenge, generate_verifier};
use crate::token::{TokenResponse, form_request};

/// Client registration for one OAuth client.
#[derive(Debug, Clone)]
pub struct WebServerFlow {
    client_id: String,
    client_secret: Secret<String>,
    scopes: Vec<String>,
    redirect_uri: String,
    auth_uri: String,
    token_uri: String,
    revoke_uri: String,
    user_agent: Option<String>,
    login_hint: Option<String>,
    code_verifier: Option<String>,
}

/// The `web` or `installed` section of a client secrets file.
#[derive(Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
    #[serde(default)]
    auth_uri: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    revoke_uri: Option<String>,
}

impl WebServerFlow {
    pub fn new<I, S>(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scopes: I,
        redirect_uri: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client_id: client_id.into(),
            client_secret: Secret::new(client_secret.into()),
            scopes: scopes.into_iter().map(Into::into).collect(),
            redirect_uri: redirect_uri.into(),
            auth_uri: GOOGLE_AUTH_URI.into(),
            token_uri: GOOGLE_TOKEN_URI.into(),
            revoke_uri: GOOGLE_REVOKE_URI.into(),
            user_agent: None,
            login_hint: None,
            code_verifier: None,
        }
    }

    /// Flow from a client secrets document (`{"web": {...}}` or
    /// `{"installed": {...}}`).
    ///
    /// Without an explicit `redirect_uri` the first registered one is used,
    /// falling back to the out-of-band URN.
    pub fn from_client_secrets<I, S>(info: &Value, scopes: I, redirect_uri: Option<String>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let section = ["web", "installed"]
            .into_iter()
            .find_map(|name| info.get(name))
            .ok_or_else(|| {
                Error::Configuration("client secrets must have a \"web\" or \"installed\" section".into())
            })?;
        let secrets: ClientSecrets = serde_json::from_value(section.clone())
            .map_err(|e| Error::Configuration(format!("invalid client secrets: {e}")))?;

        let redirect_uri = redirect_uri
            .or_else(|| secrets.redirect_uris.first().cloned())
            .unwrap_or_else(|| OOB_CALLBACK_URN.into());
        let mut flow = Self::new(secrets.client_id, secrets.client_secret, scopes, redirect_uri);
        if let Some(auth_uri) = secrets.auth_uri {
            flow.auth_uri = auth_uri;
        }
        if let Some(token_uri) = secrets.token_uri {
            flow.token_uri = token_uri;
        }
        if let Some(revoke_uri) = secrets.revoke_uri {
            flow.revoke_uri = revoke_uri;
        }
        Ok(flow)
    }

    pub async fn from_client_secrets_file<I, S>(
        path: impl AsRef<Path>,
        scopes: I,
        redirect_uri: Option<String>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let path = path.as_ref();
        let contents = tokio::fs::read(path).await?;
        let info: Value = serde_json::from_slice(&contents).map_err(|e| {
            Error::Configuration(format!("{} is not a client secrets file: {e}", path.display()))
        })?;
        Self::from_client_secrets(&info, scopes, redirect_uri)
    }

    /// Send a fresh S256 PKCE challenge with step 1 and its verifier with step 2.
    pub fn with_pkce(self) -> Self {
        self.with_code_verifier(generate_verifier())
    }

    pub fn with_code_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(verifier.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_login_hint(mut self, login_hint: impl Into<String>) -> Self {
        self.login_hint = Some(login_hint.into());
        self
    }

    pub fn with_auth_uri(mut self, auth_uri: impl Into<String>) -> Self {
        self.auth_uri = auth_uri.into();
        self
    }

    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = token_uri.into();
        self
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn code_verifier(&self) -> Option<&str> {
        self.code_verifier.as_deref()
    }

    /// URL of the consent page. Requests offline access so the exchange
    /// returns a refresh token.
    pub fn step1_get_authorize_url(&self, state: Option<&str>) -> String {
        let scope = scopes_to_string(&self.scopes);
        let mut url = self.auth_uri.clone();
        for (name, value) in [
            ("client_id", Some(self.client_id.as_str())),
            ("redirect_uri", Some(self.redirect_uri.as_str())),
            ("scope", Some(scope.as_str())),
            ("response_type", Some("code")),
            ("access_type", Some("offline")),
            ("state", state),
            ("login_hint", self.login_hint.as_deref()),
        ] {
            url = add_query_parameter(&url, name, value);
        }
        if let Some(verifier) = &self.code_verifier {
            url = add_query_parameter(&url, "code_challenge", Some(compute_challenge(verifier).as_str()));
            url = add_query_parameter(&url, "code_challenge_method", Some("S256"));
        }
        url
    }

    /// Exchange an authorization code for credentials.
    pub async fn step2_exchange<H: HttpRequester + ?Sized>(&self, http: &H, code: &str) -> Result<Credentials> {
        let scope = scopes_to_string(&self.scopes);
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose().as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("scope", scope.as_str()),
        ];
        if let Some(verifier) = &self.code_verifier {
            params.push(("code_verifier", verifier.as_str()));
        }

        let request = form_request(&self.token_uri, &params, self.user_agent.as_deref());
        let response = http.request(request).await?;
        let token = TokenResponse::parse(response.status, &response.body).map_err(|e| match e {
            Error::Refresh { status, message } => {
                warn!(token_uri = %self.token_uri, status, error = %message, "authorization code exchange failed");
                Error::Exchange { status, message }
            }
            other => other,
        })?;

        let mut credentials = Credentials::oauth2(
            self.client_id.clone(),
            self.client_secret.expose().clone(),
            token.refresh_token.clone(),
            self.token_uri.clone(),
        )?
        .with_scopes(self.scopes.iter().cloned())
        .with_revoke_uri(self.revoke_uri.clone());
        credentials.user_agent = self.user_agent.clone();
        let has_refresh_token = credentials.refresh_token.is_some();
        credentials.apply_token_response(token, Utc::now().naive_utc());

        info!(token_uri = %self.token_uri, has_refresh_token, "authorization code exchanged");
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialKind, TokenState};
    use crate::testing::HttpMockSequence;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::collections::HashMap;
    use url::Url;

    const CLIENT_SECRETS: &str = include_str!("../tests/data/client_secrets.json");
    const SCOPE: &str = "https://www.googleapis.com/auth/userinfo.email";

    fn flow() -> WebServerFlow {
        WebServerFlow::from_client_secrets(&serde_json::from_str(CLIENT_SECRETS).unwrap(), [SCOPE], None)
            .unwrap()
    }

    fn query(url: &str) -> HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[test]
    fn client_secrets_web_section() {
        let flow = flow();
        assert_eq!(flow.client_id, "web-client-id");
        assert_eq!(flow.redirect_uri(), "https://app.example.com/oauth2callback");
        assert_eq!(flow.token_uri, GOOGLE_TOKEN_URI);
    }

    #[test]
    fn client_secrets_installed_section_defaults_to_oob() {
        let info = json!({"installed": {"client_id": "cid", "client_secret": "cs"}});
        let flow = WebServerFlow::from_client_secrets(&info, [SCOPE], None).unwrap();
        assert_eq!(flow.redirect_uri(), OOB_CALLBACK_URN);

        let flow = WebServerFlow::from_client_secrets(&info, [SCOPE], Some("http://localhost:8080".into())).unwrap();
        assert_eq!(flow.redirect_uri(), "http://localhost:8080");
    }

    #[test]
    fn client_secrets_without_section_is_rejected() {
        let info = json!({"other": {"client_id": "cid", "client_secret": "cs"}});
        assert!(matches!(
            WebServerFlow::from_client_secrets(&info, [SCOPE], None),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn authorize_url_carries_offline_request() {
        let url = flow()
            .with_login_hint("user@example.com")
            .step1_get_authorize_url(Some("xyz"));
        assert!(url.starts_with(GOOGLE_AUTH_URI));

        let params = query(&url);
        assert_eq!(params["client_id"], "web-client-id");
        assert_eq!(params["redirect_uri"], "https://app.example.com/oauth2callback");
        assert_eq!(params["scope"], SCOPE);
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["state"], "xyz");
        assert_eq!(params["login_hint"], "user@example.com");
        assert!(!params.contains_key("code_challenge"));
    }

    #[test]
    fn authorize_url_carries_pkce_challenge() {
        let flow = flow().with_pkce();
        let params = query(&flow.step1_get_authorize_url(None));
        assert!(!params.contains_key("state"));
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["code_challenge"], compute_challenge(flow.code_verifier().unwrap()));
    }

    #[tokio::test]
    async fn exchange_returns_oauth2_credentials() {
        let http = HttpMockSequence::new([(
            StatusCode::OK,
            r#"{"access_token":"SlAV32hkKG","expires_in":3600,"refresh_token":"8xLOxBtZp8"}"#,
        )]);
        let flow = flow().with_code_verifier("verifier-123").with_user_agent("flow-test/1.0");
        let credentials = flow.step2_exchange(&http, "some random code").await.unwrap();

        assert_eq!(credentials.kind, CredentialKind::OAuth2);
        assert_eq!(credentials.access_token.as_deref(), Some("SlAV32hkKG"));
        assert_eq!(credentials.refresh_token.as_deref(), Some("8xLOxBtZp8"));
        assert_eq!(credentials.client_id.as_deref(), Some("web-client-id"));
        assert!(credentials.scopes.contains(SCOPE));
        assert_eq!(credentials.state(), TokenState::Fresh);

        let request = &http.requests()[0];
        assert_eq!(request.uri, GOOGLE_TOKEN_URI);
        assert_eq!(request.header("user-agent"), Some("flow-test/1.0"));
        let form = request.form();
        assert_eq!(form["grant_type"], "authorization_code");
        assert_eq!(form["code"], "some random code");
        assert_eq!(form["client_secret"], "web-client-secret");
        assert_eq!(form["code_verifier"], "verifier-123");
    }

    #[tokio::test]
    async fn exchange_failure_is_exchange_error() {
        let http = HttpMockSequence::new([(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Malformed auth code."}"#,
        )]);
        let err = flow().step2_exchange(&http, "bad").await.unwrap_err();
        match err {
            Error::Exchange { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "invalid_grant: Malformed auth code.");
            }
            other => panic!("expected Exchange, got {other:?}"),
        }
    }
}
