//! Authorize-and-retry requester
//!
//! [`AuthorizedHttp`] wraps any [`HttpRequester`] and is one itself. Each
//! call applies the current access token (refreshing first if it is stale)
//! and sends the request. A 401 from a refreshable credential forces one
//! refresh and one retry; the retried response is returned whatever its
//! status. Request bodies are buffered up front so the retry can replay
//! them.

use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tracing::{debug, info};

use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::http::{Body, HttpRequest, HttpRequester, HttpResponse};
use crate::stored::{SharedCredentials, StoredCredentials};

/// Requester that authorizes every request with shared credentials.
///
/// Token refreshes go through the wrapped requester.
#[derive(Debug, Clone)]
pub struct AuthorizedHttp<H> {
    inner: H,
    credentials: SharedCredentials,
}

impl<H: HttpRequester> AuthorizedHttp<H> {
    pub fn new(inner: H, credentials: SharedCredentials) -> Self {
        Self { inner, credentials }
    }

    /// Wrap an in-memory credential with no storage attached.
    pub fn from_credentials(inner: H, credentials: Credentials) -> Self {
        Self::new(inner, StoredCredentials::new(credentials).into_shared())
    }

    pub fn credentials(&self) -> &SharedCredentials {
        &self.credentials
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    /// Headers for one attempt, plus the access token they carry.
    ///
    /// `force_refresh_of` names a token the server rejected: it is replaced
    /// unless a concurrent request already did so.
    async fn authorize(
        &self,
        headers: &HeaderMap,
        force_refresh_of: Option<&Option<String>>,
    ) -> Result<(HeaderMap, Option<String>)> {
        let mut stored = self.credentials.lock().await;
        match force_refresh_of {
            Some(rejected) if stored.credentials().access_token == *rejected => {
                info!(class = stored.credentials().class().tag(), "access token rejected, refreshing");
                stored.refresh(&self.inner).await?;
            }
            Some(_) => debug!("access token already replaced by a concurrent refresh"),
            None => stored.ensure_valid(&self.inner).await?,
        }

        let mut authorized = headers.clone();
        stored.credentials().apply_headers(&mut authorized)?;
        Ok((authorized, stored.credentials().access_token.clone()))
    }

    async fn is_refreshable(&self) -> bool {
        self.credentials.lock().await.credentials().is_refreshable()
    }
}

impl<H: HttpRequester> HttpRequester for AuthorizedHttp<H> {
    fn request(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            let HttpRequest {
                method,
                uri,
                headers,
                body,
            } = request;
            let body = body.buffer().await?;
            let replay = |body: &Body| {
                body.try_clone()
                    .ok_or_else(|| Error::Body("buffered body cannot be replayed".into()))
            };

            let (authorized, token) = self.authorize(&headers, None).await?;
            let first = HttpRequest {
                method: method.clone(),
                uri: uri.clone(),
                headers: authorized,
                body: replay(&body)?,
            };
            let response = self.inner.request(first).await?;

            if response.status != StatusCode::UNAUTHORIZED || !self.is_refreshable().await {
                return Ok(response);
            }

            let (authorized, _) = self.authorize(&headers, Some(&token)).await?;
            debug!(%method, uri = %uri, "retrying request with refreshed token");
            self.inner
                .request(HttpRequest {
                    method,
                    uri,
                    headers: authorized,
                    body,
                })
                .await
        })
    }
}
