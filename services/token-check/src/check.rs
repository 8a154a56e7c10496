//! End-to-end credential checks
//!
//! Each check builds credentials from a key file, wraps the HTTP client in
//! [`AuthorizedHttp`] and fetches the userinfo endpoint. The check passes
//! when the endpoint answers 200 with the expected account email.

use anyhow::{Context, Result, bail};
use oauth_credentials::{
    AuthorizedHttp, Credentials, FileStorage, HttpRequest, HttpRequester, Storage,
    StoredCredentials,
};
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: Option<String>,
}

/// GET `userinfo_uri` through `http` and compare the reported email.
pub async fn check_user_info<H: HttpRequester + ?Sized>(
    http: &H,
    userinfo_uri: &str,
    expected_email: &str,
) -> Result<()> {
    let response = http.request(HttpRequest::get(userinfo_uri)).await?;
    if response.status != StatusCode::OK {
        bail!(
            "userinfo returned {} (expected 200): {}",
            response.status,
            response.text()
        );
    }

    let payload: UserInfo =
        serde_json::from_slice(&response.body).context("userinfo response is not JSON")?;
    match payload.email.as_deref() {
        Some(email) if email == expected_email => Ok(()),
        Some(email) => bail!("userinfo reported {email}, expected {expected_email}"),
        None => bail!("userinfo response has no email field"),
    }
}

/// Service account key file; the expected email is the account's own.
pub async fn run_service_account(config: &Config, client: &reqwest::Client) -> Result<()> {
    let path = config.json_key_path();
    let credentials = Credentials::from_json_keyfile_name(path, config.check.scopes.iter().cloned())
        .await
        .with_context(|| format!("failed to load service account key {}", path.display()))?;
    let Some(email) = service_account_email(&credentials) else {
        bail!("{} is not a service account key", path.display());
    };

    run(config, client, credentials, &email, "service_account.json").await?;
    info!(email = %email, "service account check passed");
    Ok(())
}

/// Authorized-user key file checked against the configured email.
pub async fn run_user(config: &Config, client: &reqwest::Client) -> Result<()> {
    let path = config.user_key_path();
    let credentials = Credentials::from_authorized_user_file(path)
        .await
        .with_context(|| format!("failed to load authorized user file {}", path.display()))?
        .with_user_agent(config.check.user_agent.clone());

    run(config, client, credentials, config.user_email(), "authorized_user.json").await?;
    info!(email = config.user_email(), "authorized user check passed");
    Ok(())
}

async fn run(
    config: &Config,
    client: &reqwest::Client,
    credentials: Credentials,
    expected_email: &str,
    slot: &str,
) -> Result<()> {
    let stored = match config.check.credentials_dir.as_deref() {
        Some(dir) => StoredCredentials::with_storage(credentials, storage_in(dir, slot)),
        None => StoredCredentials::new(credentials),
    };
    let http = AuthorizedHttp::new(client.clone(), stored.into_shared());
    check_user_info(&http, &config.check.userinfo_uri, expected_email).await
}

fn storage_in(dir: &Path, slot: &str) -> Arc<dyn Storage> {
    Arc::new(FileStorage::new(dir.join(slot)))
}

fn service_account_email(credentials: &Credentials) -> Option<String> {
    match &credentials.kind {
        oauth_credentials::CredentialKind::ServiceAccount(account) => {
            Some(account.email().to_owned())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CheckConfig, ServiceAccountConfig, UserConfig};
    use axum::Json;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post};
    use serde_json::{Value, json};
    use std::path::PathBuf;

    const SA_EMAIL: &str = "robot@example-project.iam.gserviceaccount.com";
    const USER_EMAIL: &str = "user@example.com";

    /// Token endpoint that always issues `tok`, and a userinfo endpoint that
    /// answers with `email` only for that token.
    async fn start_mock_google(email: &'static str) -> String {
        let app = axum::Router::new()
            .route(
                "/token",
                post(|| async { Json(json!({"access_token": "tok", "expires_in": 3600})) }),
            )
            .route(
                "/userinfo",
                get(move |headers: HeaderMap| async move {
                    let authorized = headers
                        .get("authorization")
                        .is_some_and(|v| v.as_bytes() == b"Bearer tok");
                    if authorized {
                        (AxumStatus::OK, Json(json!({"email": email})))
                    } else {
                        (AxumStatus::UNAUTHORIZED, Json(json!({"error": "invalid_token"})))
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_vec(value).unwrap()).unwrap();
        path
    }

    fn key_files(dir: &Path, base: &str) -> (PathBuf, PathBuf) {
        let mut sa: Value = serde_json::from_str(include_str!(
            "../../../crates/oauth-credentials/tests/data/service_account.json"
        ))
        .unwrap();
        sa["token_uri"] = json!(format!("{base}/token"));

        let mut user: Value = serde_json::from_str(include_str!(
            "../../../crates/oauth-credentials/tests/data/authorized_user.json"
        ))
        .unwrap();
        user["token_uri"] = json!(format!("{base}/token"));

        (write_json(dir, "sa.json", &sa), write_json(dir, "user.json", &user))
    }

    fn config(base: &str, sa: PathBuf, user: PathBuf, credentials_dir: Option<PathBuf>) -> Config {
        Config {
            check: CheckConfig {
                userinfo_uri: format!("{base}/userinfo"),
                credentials_dir,
                ..CheckConfig::default()
            },
            service_account: ServiceAccountConfig {
                json_key_path: Some(sa),
            },
            user: UserConfig {
                key_path: Some(user),
                email: Some(USER_EMAIL.into()),
            },
        }
    }

    #[tokio::test]
    async fn service_account_check_passes() {
        let base = start_mock_google(SA_EMAIL).await;
        let dir = tempfile::tempdir().unwrap();
        let (sa, user) = key_files(dir.path(), &base);

        let config = config(&base, sa, user, None);
        run_service_account(&config, &reqwest::Client::new()).await.unwrap();
    }

    #[tokio::test]
    async fn user_check_passes_and_persists() {
        let base = start_mock_google(USER_EMAIL).await;
        let dir = tempfile::tempdir().unwrap();
        let (sa, user) = key_files(dir.path(), &base);
        let store = dir.path().join("store");
        std::fs::create_dir(&store).unwrap();

        let config = config(&base, sa, user, Some(store.clone()));
        run_user(&config, &reqwest::Client::new()).await.unwrap();

        let persisted = FileStorage::new(store.join("authorized_user.json"))
            .get()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.access_token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn wrong_email_fails() {
        let base = start_mock_google("someone-else@example.com").await;
        let dir = tempfile::tempdir().unwrap();
        let (sa, user) = key_files(dir.path(), &base);

        let config = config(&base, sa, user, None);
        let err = run_user(&config, &reqwest::Client::new()).await.unwrap_err();
        assert!(err.to_string().contains("someone-else@example.com"), "{err}");
    }

    #[tokio::test]
    async fn unauthorized_userinfo_fails() {
        let base = start_mock_google(USER_EMAIL).await;
        let http = reqwest::Client::new();

        let err = check_user_info(&http, &format!("{base}/userinfo"), USER_EMAIL)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"), "{err}");
    }

    #[tokio::test]
    async fn authorized_user_file_is_not_a_service_account() {
        let base = start_mock_google(USER_EMAIL).await;
        let dir = tempfile::tempdir().unwrap();
        let (_, user) = key_files(dir.path(), &base);

        let config = config(&base, user.clone(), user, None);
        assert!(run_service_account(&config, &reqwest::Client::new()).await.is_err());
    }
}
