//! Row-keyed credential storage
//!
//! [`KeyedStorage`] maps one caller-supplied key to one row of a
//! [`CredentialTable`]. A database adapter implements `CredentialTable` with
//! a row lock or transaction; [`MemoryTable`] is the in-process table.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use super::locks::LockRegistry;
use super::{Storage, StorageLock};
use crate::codec::CredentialCodec;
use crate::credentials::Credentials;
use crate::error::{Error, Result};

/// A table of serialized credentials addressed by key.
///
/// `lock_row` must exclude every other holder of the same key until the
/// returned lock is dropped. The row operations are only called while it is
/// held.
pub trait CredentialTable: Send + Sync + fmt::Debug {
    fn lock_row<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<StorageLock>>;

    fn load_row<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>>;

    fn store_row<'a>(&'a self, key: &'a str, row: Value) -> BoxFuture<'a, Result<()>>;

    /// Removing a missing row succeeds.
    fn delete_row<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Credentials stored in one row of a [`CredentialTable`].
pub struct KeyedStorage<T: CredentialTable> {
    table: Arc<T>,
    key: String,
    codec: CredentialCodec,
}

impl<T: CredentialTable> KeyedStorage<T> {
    pub fn new(table: Arc<T>, key: impl Into<String>) -> Self {
        Self {
            table,
            key: key.into(),
            codec: CredentialCodec::default(),
        }
    }

    pub fn with_codec(mut self, codec: CredentialCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<T: CredentialTable> fmt::Debug for KeyedStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedStorage")
            .field("table", &self.table)
            .field("key", &self.key)
            .finish()
    }
}

impl<T: CredentialTable> Storage for KeyedStorage<T> {
    fn acquire_lock(&self) -> BoxFuture<'_, Result<StorageLock>> {
        self.table.lock_row(&self.key)
    }

    fn locked_get<'a>(&'a self, lock: &'a StorageLock) -> BoxFuture<'a, Result<Option<Credentials>>> {
        Box::pin(async move {
            lock.ensure_slot(&self.key)?;
            let Some(row) = self.table.load_row(&self.key).await? else {
                warn!(key = %self.key, "no stored credentials for key");
                return Ok(None);
            };
            match self.codec.from_value(row) {
                Ok(credentials) => Ok(Some(credentials)),
                Err(Error::Decode(e)) => {
                    warn!(key = %self.key, error = %e, "ignoring unreadable credential row");
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        })
    }

    fn locked_put<'a>(
        &'a self,
        lock: &'a StorageLock,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            lock.ensure_slot(&self.key)?;
            let row = self.codec.to_value(credentials)?;
            self.table.store_row(&self.key, row).await?;
            debug!(key = %self.key, class = credentials.class().tag(), "persisted credentials");
            Ok(())
        })
    }

    fn locked_delete<'a>(&'a self, lock: &'a StorageLock) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            lock.ensure_slot(&self.key)?;
            self.table.delete_row(&self.key).await?;
            debug!(key = %self.key, "deleted credentials");
            Ok(())
        })
    }
}

/// In-process [`CredentialTable`] guarded by per-key mutexes.
#[derive(Debug, Default)]
pub struct MemoryTable {
    rows: Mutex<HashMap<String, Value>>,
    locks: LockRegistry<String>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored row, bypassing the lock.
    pub fn row(&self, key: &str) -> Option<Value> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialTable for MemoryTable {
    fn lock_row<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<StorageLock>> {
        Box::pin(async move {
            let guard = self.locks.lock_for(&key.to_owned()).lock_owned().await;
            Ok(StorageLock::new(key, guard))
        })
    }

    fn load_row<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move { Ok(self.row(key)) })
    }

    fn store_row<'a>(&'a self, key: &'a str, row: Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.rows
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.to_owned(), row);
            Ok(())
        })
    }

    fn delete_row<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.rows
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key);
            Ok(())
        })
    }
}
