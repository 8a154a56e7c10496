//! File-backed credential storage
//!
//! One JSON file per slot. The lock is an in-process mutex from the shared
//! registry plus an exclusive advisory lock on `<path>.lock`, so other
//! processes addressing the same path are excluded too. Writes go to a
//! temp file in the same directory, created 0600 before any data is written,
//! then renamed over the target.

use std::fs::File;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use super::locks::{FILE_LOCKS, canonical_key};
use super::{Storage, StorageLock};
use crate::codec::CredentialCodec;
use crate::credentials::Credentials;
use crate::error::{Error, Result};

/// Credentials stored in a single JSON file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    key: PathBuf,
    codec: CredentialCodec,
}

/// In-process mutex guard plus the OS lock on the sidecar file.
///
/// `file` is `None` while the parent directory does not exist yet: there is
/// nothing on disk to share, so the in-process mutex alone covers reads.
struct FileLockGuard {
    file: Option<File>,
    _in_process: OwnedMutexGuard<()>,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        // The OS drops the lock when the handle closes anyway
        if let Some(file) = &self.file {
            let _ = fs2::FileExt::unlock(file);
        }
    }
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key = canonical_key(&path);
        Self {
            path,
            key,
            codec: CredentialCodec::default(),
        }
    }

    /// Use a codec with registered assertion kinds.
    pub fn with_codec(mut self, codec: CredentialCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn slot(&self) -> String {
        self.key.display().to_string()
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.key.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Reject symlinks and directories at the target path.
    ///
    /// Returns `false` when nothing exists there yet.
    async fn check_target(&self) -> Result<bool> {
        let metadata = match tokio::fs::symlink_metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if metadata.file_type().is_symlink() {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("credential path {} is a symlink", self.path.display()),
            )
            .into());
        }
        if metadata.is_dir() {
            return Err(io::Error::new(
                ErrorKind::IsADirectory,
                format!("credential path {} is a directory", self.path.display()),
            )
            .into());
        }
        Ok(true)
    }

    async fn write_atomic(&self, contents: &[u8]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let name = self
            .path
            .file_name()
            .ok_or_else(|| Error::Configuration(format!("{} has no file name", self.path.display())))?;
        let tmp_path = dir.join(format!(
            ".{}.tmp.{}",
            name.to_string_lossy(),
            uuid::Uuid::new_v4()
        ));

        let result = async {
            let mut options = tokio::fs::OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            options.mode(0o600);
            let mut file = options.open(&tmp_path).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &self.path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

impl Storage for FileStorage {
    fn acquire_lock(&self) -> BoxFuture<'_, Result<StorageLock>> {
        Box::pin(async move {
            let in_process = FILE_LOCKS.lock_for(&self.key).lock_owned().await;

            let lock_path = self.lock_path();
            let file = tokio::task::spawn_blocking(move || -> io::Result<Option<File>> {
                let mut options = std::fs::OpenOptions::new();
                options.read(true).write(true).create(true).truncate(false);
                #[cfg(unix)]
                std::os::unix::fs::OpenOptionsExt::mode(&mut options, 0o600);
                let file = match options.open(&lock_path) {
                    Ok(file) => file,
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(e),
                };
                fs2::FileExt::lock_exclusive(&file)?;
                Ok(Some(file))
            })
            .await
            .map_err(|e| Error::Io(io::Error::other(format!("lock task failed: {e}"))))??;

            Ok(StorageLock::new(
                self.slot(),
                FileLockGuard {
                    file,
                    _in_process: in_process,
                },
            ))
        })
    }

    fn locked_get<'a>(&'a self, lock: &'a StorageLock) -> BoxFuture<'a, Result<Option<Credentials>>> {
        Box::pin(async move {
            lock.ensure_slot(&self.slot())?;
            if !self.check_target().await? {
                warn!(path = %self.path.display(), "credential file does not exist");
                return Ok(None);
            }

            let contents = tokio::fs::read(&self.path).await?;
            match self.codec.decode_bytes(&contents) {
                Ok(credentials) => Ok(Some(credentials)),
                Err(Error::Decode(e)) => {
                    warn!(path = %self.path.display(), error = %e, "ignoring unreadable credential file");
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
            lock.ensure_slot(&self.slot())?;
            self.check_target().await?;
            let json = self.codec.encode(credentials)?;
            self.write_atomic(json.as_bytes()).await?;
            debug!(path = %self.path.display(), class = credentials.class().tag(), "persisted credentials");
            Ok(())
        })
    }

    fn locked_delete<'a>(&'a self, lock: &'a StorageLock) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            lock.ensure_slot(&self.slot())?;
            if !self.check_target().await? {
                return Ok(());
            }
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), "deleted credentials");
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}
