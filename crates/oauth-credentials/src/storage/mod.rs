//! Credential storage contract
//!
//! A storage owns one logical slot (one file, one table row). All access to
//! the slot goes through a lock: `acquire_lock` returns a [`StorageLock`]
//! guard, and the `locked_*` operations take that guard as proof it is held.
//! `get`/`put`/`delete` wrap one locked operation in acquire/release. The
//! guard releases on drop, so the lock is freed on every exit path,
//! including errors and cancelled futures.

mod file;
mod keyed;
mod locks;

pub use file::FileStorage;
pub use keyed::{CredentialTable, KeyedStorage, MemoryTable};
pub use locks::LockRegistry;

use std::any::Any;
use std::fmt;

use futures_util::future::BoxFuture;

use crate::credentials::Credentials;
use crate::error::{Error, Result};

/// Held lock on one storage slot.
pub struct StorageLock {
    slot: String,
    _guard: Box<dyn Any + Send + Sync>,
}

impl StorageLock {
    /// Wrap a backend guard. Dropping the returned lock drops the guard.
    pub fn new<G: Send + Sync + 'static>(slot: impl Into<String>, guard: G) -> Self {
        Self {
            slot: slot.into(),
            _guard: Box::new(guard),
        }
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Fail unless this lock was taken on `slot`.
    pub fn ensure_slot(&self, slot: &str) -> Result<()> {
        if self.slot == slot {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "lock for {:?} used on slot {slot:?}",
                self.slot
            )))
        }
    }
}

impl fmt::Debug for StorageLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageLock").field("slot", &self.slot).finish()
    }
}

/// Persistence backend for one credential slot.
///
/// Readers observe either the old or the new record, never a partial write.
/// `get` reports a missing or undecodable record as `None`; every other
/// failure is an error.
pub trait Storage: Send + Sync + fmt::Debug {
    fn acquire_lock(&self) -> BoxFuture<'_, Result<StorageLock>>;

    fn release_lock(&self, lock: StorageLock) {
        drop(lock);
    }

    fn locked_get<'a>(&'a self, lock: &'a StorageLock) -> BoxFuture<'a, Result<Option<Credentials>>>;

    fn locked_put<'a>(
        &'a self,
        lock: &'a StorageLock,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<()>>;

    /// Remove the record. Removing a missing record succeeds.
    fn locked_delete<'a>(&'a self, lock: &'a StorageLock) -> BoxFuture<'a, Result<()>>;

    fn get(&self) -> BoxFuture<'_, Result<Option<Credentials>>> {
        Box::pin(async move {
            let lock = self.acquire_lock().await?;
            let result = self.locked_get(&lock).await;
            self.release_lock(lock);
            result
        })
    }

    fn put<'a>(&'a self, credentials: &'a Credentials) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let lock = self.acquire_lock().await?;
            let result = self.locked_put(&lock, credentials).await;
            self.release_lock(lock);
            result
        })
    }

    fn delete(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let lock = self.acquire_lock().await?;
            let result = self.locked_delete(&lock).await;
            self.release_lock(lock);
            result
        })
    }
}
