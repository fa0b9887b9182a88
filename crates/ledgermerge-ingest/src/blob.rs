//! Blob storage for uploaded batch files.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FetchError;

/// Read access to uploaded objects.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Fetches the full contents of an object.
    async fn fetch(&self, container: &str, key: &str) -> Result<Bytes, FetchError>;
}

/// In-memory blob store for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<(String, String), Bytes>>>,
    fetches: Arc<AtomicUsize>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object, replacing any previous contents.
    pub fn insert(&self, container: &str, key: &str, data: impl Into<Bytes>) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert((container.to_string(), key.to_string()), data.into());
        }
    }

    /// Number of fetches attempted so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn fetch(&self, container: &str, key: &str) -> Result<Bytes, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.read().map_err(|_| FetchError::Io {
            container: container.to_string(),
            key: key.to_string(),
            source: std::io::Error::other("lock poisoned"),
        })?;
        objects
            .get(&(container.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            })
    }
}

/// Blob store backed by a local directory: `<root>/<container>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, container: &str, key: &str) -> Option<PathBuf> {
        let mut path = self.root.join(container);
        for part in key.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return None;
            }
            path.push(part);
        }
        Some(path)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn fetch(&self, container: &str, key: &str) -> Result<Bytes, FetchError> {
        let not_found = || FetchError::NotFound {
            container: container.to_string(),
            key: key.to_string(),
        };
        if container.is_empty() || container.contains(['/', '\\']) || container == ".." {
            return Err(not_found());
        }
        let path = self.path_for(container, key).ok_or_else(not_found)?;

        match tokio::fs::read(&path).await {
            Ok(data) => {
                tracing::debug!(path = %path.display(), bytes = data.len(), "fetched object");
                Ok(Bytes::from(data))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found()),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(FetchError::AccessDenied {
                container: container.to_string(),
                key: key.to_string(),
            }),
            Err(source) => Err(FetchError::Io {
                container: container.to_string(),
                key: key.to_string(),
                source,
            }),
        }
    }
}
