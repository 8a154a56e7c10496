//! Process-wide lock registry
//!
//! Each storage slot gets exactly one in-process mutex, created the first
//! time any storage instance addresses it. Two `FileStorage` values built
//! from different spellings of the same path share a mutex because file
//! paths are canonicalized before lookup.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, PoisonError};

use tokio::sync::Mutex;

/// Lazily created per-key mutexes.
#[derive(Debug)]
pub struct LockRegistry<K = PathBuf> {
    locks: std::sync::Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for LockRegistry<K> {
    fn default() -> Self {
        Self {
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> LockRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex for `key`, created on first use.
    pub fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.clone()).or_default().clone()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry shared by every file-backed storage in the process.
pub(crate) static FILE_LOCKS: LazyLock<LockRegistry> = LazyLock::new(LockRegistry::new);

/// Canonical form of a credential path, usable before the file exists.
///
/// The parent directory is resolved; the file name is kept as given so a
/// symlink at the final component is still visible to the storage.
pub(crate) fn canonical_key(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(parent) => parent.join(name),
            Err(_) => absolute,
        },
        _ => absolute,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_shares_a_mutex() {
        let registry: LockRegistry<String> = LockRegistry::new();
        let a = registry.lock_for(&"slot".to_string());
        let b = registry.lock_for(&"slot".to_string());
        let c = registry.lock_for(&"other".to_string());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn equivalent_paths_share_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let direct = dir.path().join("credentials.json");
        let dotted = dir.path().join("nested").join("..").join("credentials.json");
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        assert_eq!(canonical_key(&direct), canonical_key(&dotted));
    }

    #[tokio::test]
    async fn registry_mutex_excludes_second_holder() {
        let registry: LockRegistry<String> = LockRegistry::new();
        let key = "slot".to_string();
        let held = registry.lock_for(&key).lock_owned().await;
        assert!(registry.lock_for(&key).try_lock().is_err());
        drop(held);
        assert!(registry.lock_for(&key).try_lock().is_ok());
    }
}
