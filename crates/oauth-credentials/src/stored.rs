//! Credentials paired with the storage they persist to
//!
//! A refresh through [`StoredCredentials`] runs under the storage lock:
//! it first reads the stored copy, and if another holder already refreshed
//! (different, unexpired access token) that copy is adopted with no network
//! call. Otherwise the token endpoint is called and the result written back
//! before the lock is released.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use tracing::debug;

use crate::credentials::{Credentials, TokenState};
use crate::error::{Error, Result};
use crate::http::HttpRequester;
use crate::storage::{Storage, StorageLock};

/// One credential shared between tasks. The mutex serializes refreshes.
pub type SharedCredentials = Arc<tokio::sync::Mutex<StoredCredentials>>;

/// A credential with an optional storage handle for auto-persist.
#[derive(Debug, Clone)]
pub struct StoredCredentials {
    credentials: Credentials,
    storage: Option<Arc<dyn Storage>>,
}

impl StoredCredentials {
    /// In-memory only; refresh results are not persisted.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            storage: None,
        }
    }

    pub fn with_storage(credentials: Credentials, storage: Arc<dyn Storage>) -> Self {
        Self {
            credentials,
            storage: Some(storage),
        }
    }

    /// Read the slot and attach `storage` to what was found.
    pub async fn load(storage: Arc<dyn Storage>) -> Result<Option<Self>> {
        let Some(credentials) = storage.get().await? else {
            return Ok(None);
        };
        Ok(Some(Self::with_storage(credentials, storage)))
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Direct access for callers editing fields; call [`Self::persist`] after.
    pub fn credentials_mut(&mut self) -> &mut Credentials {
        &mut self.credentials
    }

    pub fn into_inner(self) -> Credentials {
        self.credentials
    }

    pub fn storage(&self) -> Option<&Arc<dyn Storage>> {
        self.storage.as_ref()
    }

    pub fn set_storage(&mut self, storage: Option<Arc<dyn Storage>>) {
        self.storage = storage;
    }

    pub fn into_shared(self) -> SharedCredentials {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn state(&self) -> TokenState {
        self.credentials.state()
    }

    /// Write the current credential to the attached storage, if any.
    pub async fn persist(&self) -> Result<()> {
        match &self.storage {
            Some(storage) => storage.put(&self.credentials).await,
            None => Ok(()),
        }
    }

    /// Refresh unless the access token is fresh.
    pub async fn ensure_valid<H: HttpRequester + ?Sized>(&mut self, http: &H) -> Result<()> {
        match self.credentials.state() {
            TokenState::Fresh => Ok(()),
            TokenState::Invalid if self.credentials.invalid => Err(Error::NonRefreshable(
                "credentials have been revoked".into(),
            )),
            TokenState::Invalid | TokenState::Expired => self.refresh(http).await,
        }
    }

    /// Fetch a new access token and persist it.
    ///
    /// When persisting fails the in-memory credential keeps the new token
    /// and the storage error is returned.
    pub async fn refresh<H: HttpRequester + ?Sized>(&mut self, http: &H) -> Result<()> {
        let Some(storage) = self.storage.clone() else {
            return self.credentials.refresh(http).await;
        };

        let lock = storage.acquire_lock().await?;
        let result = self.refresh_locked(storage.as_ref(), &lock, http).await;
        storage.release_lock(lock);
        result
    }

    async fn refresh_locked<H: HttpRequester + ?Sized>(
        &mut self,
        storage: &dyn Storage,
        lock: &StorageLock,
        http: &H,
    ) -> Result<()> {
        if let Some(stored) = storage.locked_get(lock).await? {
            let newer = stored.access_token.is_some()
                && stored.access_token != self.credentials.access_token
                && stored.state() == TokenState::Fresh;
            if newer {
                debug!(class = stored.class().tag(), "adopting credentials refreshed by another holder");
                self.credentials = stored;
                return Ok(());
            }
        }

        self.credentials.refresh(http).await?;
        storage.locked_put(lock, &self.credentials).await
    }

    /// Revoke the tokens and persist the invalidated credential.
    pub async fn revoke<H: HttpRequester + ?Sized>(&mut self, http: &H) -> Result<()> {
        self.credentials.revoke(http).await?;
        self.persist().await
    }

    /// Ensure a fresh token, then set the `Authorization` header.
    pub async fn apply<H: HttpRequester + ?Sized>(
        &mut self,
        http: &H,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        self.ensure_valid(http).await?;
        self.credentials.apply_headers(headers)
    }
}
