//! File store
//!
//! A flat directory of uploaded files addressed by name only. Uploads and
//! downloads go through a single store-wide lock; listing does not.

use crate::protocol::validate_file_name;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Shared handle to the store directory and its lock
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    gate: Arc<Mutex<()>>,
}

/// Proof of exclusive access to the store
///
/// Released when dropped.
#[derive(Debug)]
pub struct StoreGuard {
    _guard: OwnedMutexGuard<()>,
}

impl FileStore {
    /// Open the store at `root`, creating the directory if needed
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "File store opened");

        Ok(Self {
            root,
            gate: Arc::new(Mutex::new(())),
        })
    }

    /// Store directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a validated name to its on-disk path
    ///
    /// # Errors
    ///
    /// [`Error::InvalidFileName`] if `name` is not a plain file name.
    pub fn path_of(&self, name: &str) -> Result<PathBuf> {
        validate_file_name(name)?;
        Ok(self.root.join(name))
    }

    /// Check whether `name` exists as a regular file
    ///
    /// # Errors
    ///
    /// [`Error::InvalidFileName`] for invalid names, [`Error::Io`] for
    /// failures other than the file being absent.
    pub async fn contains(&self, name: &str) -> Result<bool> {
        let path = self.path_of(name)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Acquire the store-wide lock, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if another transfer holds the lock for too long.
    pub async fn lock(&self, timeout: Duration) -> Result<StoreGuard> {
        let guard = tokio::time::timeout(timeout, self.gate.clone().lock_owned())
            .await
            .map_err(|_| Error::timeout("waiting for store lock"))?;
        Ok(StoreGuard { _guard: guard })
    }

    /// Create or truncate `name` for writing
    ///
    /// # Errors
    ///
    /// [`Error::InvalidFileName`] or [`Error::Io`].
    pub async fn create(&self, _guard: &StoreGuard, name: &str) -> Result<File> {
        let path = self.path_of(name)?;
        Ok(File::create(&path).await?)
    }

    /// Read `name` fully into memory
    ///
    /// # Errors
    ///
    /// [`Error::FileNotFound`] if it disappeared, otherwise [`Error::Io`].
    pub async fn read(&self, _guard: &StoreGuard, name: &str) -> Result<Vec<u8>> {
        let path = self.path_of(name)?;
        let mut file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::FileNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata().await?.len();
        let mut data = Vec::with_capacity(usize::try_from(len).unwrap_or_default());
        file.read_to_end(&mut data).await?;
        Ok(data)
    }

    /// Names of the regular files directly inside the store, sorted
    ///
    /// Entries that are not valid file names (not UTF-8, containing the list
    /// delimiter, ...) are skipped, so every listed name can be downloaded.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the directory cannot be read.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if validate_file_name(&name).is_ok() => names.push(name),
                Ok(name) => debug!(name, "Skipping unlistable store entry"),
                Err(raw) => debug!(name = ?raw, "Skipping non UTF-8 store entry"),
            }
        }

        names.sort();
        Ok(names)
    }
}
