//! Directory-backed store.
//!
//! Each joined record lives in `<root>/<hex(key)>.json` as
//! `{"version": n, "record": {...}}`. Keys whose hex form would not fit a
//! file name are stored as `<root>/h-<sha256(key)>.json` instead. Writes go to a temporary file and are
//! renamed into place. Compare-and-swap is serialized by an in-process mutex,
//! so the store is safe for concurrent tasks of one process but not for
//! several processes sharing a directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::joined::JoinedRecord;
use crate::merge_key::MergeKey;
use crate::store::{JoinedStore, Versioned, WritePrecondition, WriteResult, check_precondition};

// Leaves room for the `.json.tmp` suffix under the usual 255-byte limit.
const MAX_HEX_NAME_LEN: usize = 200;

#[derive(Debug, Serialize, Deserialize)]
struct StoredFile {
    version: i64,
    record: JoinedRecord,
}

/// Store that keeps one JSON file per merge key under a root directory.
#[derive(Debug)]
pub struct DirectoryStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl DirectoryStore {
    /// Opens (and creates, if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            Error::storage_with_source(format!("create store dir {}", root.display()), e)
        })?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &MergeKey) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(key)))
    }

    async fn read_file(&self, key: &MergeKey) -> Result<Option<StoredFile>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: StoredFile =
                    serde_json::from_slice(&bytes).map_err(|e| Error::Serialization {
                        message: format!("decode record at {key}: {e}"),
                    })?;
                Ok(Some(file))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage_with_source(
                format!("read {}", path.display()),
                e,
            )),
        }
    }
}

// Hex names only use [0-9a-f], so the `h-` form cannot collide with them.
fn file_stem(key: &MergeKey) -> String {
    let encoded = hex::encode(key.as_str());
    if encoded.len() <= MAX_HEX_NAME_LEN {
        encoded
    } else {
        format!("h-{}", hex::encode(Sha256::digest(key.as_str().as_bytes())))
    }
}

#[async_trait]
impl JoinedStore for DirectoryStore {
    async fn get(&self, key: &MergeKey) -> Result<Option<Versioned<JoinedRecord>>> {
        Ok(self.read_file(key).await?.map(|file| Versioned {
            value: file.record,
            version: file.version.to_string(),
        }))
    }

    async fn put(
        &self,
        key: &MergeKey,
        record: &JoinedRecord,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let _guard = self.write_lock.lock().await;

        let current = self.read_file(key).await?.map(|f| f.version);
        if let Some(current_version) = check_precondition(&precondition, current) {
            return Ok(WriteResult::PreconditionFailed { current_version });
        }

        let version = current.map_or(1, |v| v + 1);
        let file = StoredFile {
            version,
            record: record.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::storage_with_source(format!("write {}", tmp.display()), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::storage_with_source(format!("rename {}", path.display()), e))?;

        tracing::debug!(key = %key, version, "wrote record file");
        Ok(WriteResult::Success {
            version: version.to_string(),
        })
    }
}
