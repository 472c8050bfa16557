//! Image storage.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

/// A boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors produced by image stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file name: {0}")]
    InvalidName(String),
}

/// Persists decoded images under server-assigned names.
pub trait ImageStore: Send + Sync {
    /// Makes the store ready to accept writes.
    fn prepare(&self) -> StoreFuture<'_, ()>;

    /// Writes `bytes` under `filename`, replacing any existing file.
    /// Returns the full path written.
    fn save<'a>(&'a self, filename: &'a str, bytes: &'a [u8]) -> StoreFuture<'a, PathBuf>;
}

/// Stores images as flat files in one directory.
#[derive(Debug, Clone)]
pub struct DirImageStore {
    root: PathBuf,
}

impl DirImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ImageStore for DirImageStore {
    fn prepare(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if !tokio::fs::try_exists(&self.root).await? {
                tokio::fs::create_dir_all(&self.root).await?;
                tracing::info!(path = %self.root.display(), "image directory created");
            }
            Ok(())
        })
    }

    fn save<'a>(&'a self, filename: &'a str, bytes: &'a [u8]) -> StoreFuture<'a, PathBuf> {
        Box::pin(async move {
            validate_file_name(filename)?;
            let path = self.root.join(filename);
            tokio::fs::write(&path, bytes).await?;
            Ok(path)
        })
    }
}

/// Accepts a single plain path component: no separators, no traversal,
/// no drive or root prefix.
fn validate_file_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidName("empty name".into()));
    }

    if name.contains(['/', '\\']) {
        return Err(StoreError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(StoreError::InvalidName(format!(
            "not a plain file name: {name}"
        ))),
    }
}
