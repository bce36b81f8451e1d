//! Durable JSON state storage with per-path write serialization.
//!
//! Every mutation is "acquire the path lock, read the freshest on-disk
//! state, mutate in memory, write atomically, release". Writes go through a
//! temp file in the destination directory followed by a rename, so a reader
//! never observes a half-written document. Reads fail open: a missing,
//! unreadable, or malformed file yields the default value instead of an
//! error.
//!
//! Locks are process-local only; there is no cross-process coordination.

use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use {
    serde::{Serialize, de::DeserializeOwned},
    tokio::sync::Mutex,
    tracing::warn,
};

use crate::error::{Error, Result};

/// Process-wide state store. Construct once and share via [`Arc`].
#[derive(Debug, Default)]
pub struct StateStore {
    /// One async mutex per normalized path. `tokio::sync::Mutex` is fair,
    /// so contending writers drain in submission order.
    locks: StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_handle(&self, path: &Path) -> Arc<Mutex<()>> {
        let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key).or_default())
    }

    /// Create the file with `default` content if it does not exist yet.
    pub async fn ensure_initialized<T>(&self, path: &Path, default: &T) -> Result<()>
    where
        T: Serialize,
    {
        let handle = self.lock_handle(path);
        let _guard = handle.lock().await;
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }
        self.write_atomic(path, default).await
    }

    /// Fail-open read: missing file silently yields the default; anything
    /// unreadable or unparseable yields the default and is logged so
    /// operators can tell corruption from a fresh install.
    pub async fn read<T>(&self, path: &Path) -> T
    where
        T: DeserializeOwned + Default,
    {
        match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => value,
                Err(error) => {
                    warn!(path = %path.display(), %error, "state file malformed, using default");
                    T::default()
                },
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => T::default(),
            Err(error) => {
                warn!(path = %path.display(), %error, "state file unreadable, using default");
                T::default()
            },
        }
    }

    /// Serialized read-modify-write against the freshest on-disk state.
    ///
    /// The lock covers exactly the read, the in-memory mutation, and the
    /// atomic write; it is never held across foreign await points.
    pub async fn update<T, R, F>(&self, path: &Path, mutate: F) -> Result<R>
    where
        T: DeserializeOwned + Default + Serialize + Send,
        R: Send,
        F: FnOnce(&mut T) -> R + Send,
    {
        let handle = self.lock_handle(path);
        let _guard = handle.lock().await;
        let mut state: T = self.read(path).await;
        let out = mutate(&mut state);
        self.write_atomic(path, &state).await?;
        Ok(out)
    }

    /// Serialize to a temp file in the destination directory, fsync, then
    /// rename over the target.
    async fn write_atomic<T>(&self, path: &Path, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let bytes = serde_json::to_vec_pretty(value)?;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let parent = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => PathBuf::from("."),
            };
            std::fs::create_dir_all(&parent).map_err(|e| Error::storage(&path, e))?;
            let mut tmp =
                tempfile::NamedTempFile::new_in(&parent).map_err(|e| Error::storage(&path, e))?;
            tmp.write_all(&bytes).map_err(|e| Error::storage(&path, e))?;
            tmp.as_file().sync_all().map_err(|e| Error::storage(&path, e))?;
            tmp.persist(&path).map_err(|e| Error::storage(&path, e.error))?;
            Ok(())
        })
        .await?
    }
}
