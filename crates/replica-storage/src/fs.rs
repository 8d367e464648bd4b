//! Filesystem object store: each bucket is a directory under a common root.
//!
//! # Design
//! - Copies land in a sibling `.partial` file and are renamed into place, so
//!   `object_exists` never observes a half-written target.
//! - Keys are relative paths; absolute keys and `..` segments are rejected.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use replica_core::{ObjectStore, ObjectStoreError};
use tokio::fs;
use tracing::debug;

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`. Directories are created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(
        &self,
        operation: &'static str,
        bucket: &str,
        key: &str,
    ) -> Result<PathBuf, ObjectStoreError> {
        let invalid = |reason: &'static str| {
            ObjectStoreError::transport(
                operation,
                bucket,
                key,
                io::Error::new(io::ErrorKind::InvalidInput, reason),
            )
        };
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket.starts_with('.') {
            return Err(invalid("bucket is not a plain directory name"));
        }
        let relative = Path::new(key);
        if key.is_empty()
            || !relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(invalid("key must be a relative path without parent segments"));
        }
        Ok(self.root.join(bucket).join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
    ) -> Result<String, ObjectStoreError> {
        let source = self.object_path("copy_object", source_bucket, source_key)?;
        let target = self.object_path("copy_object", target_bucket, target_key)?;
        let failed = |err: io::Error| {
            ObjectStoreError::transport("copy_object", target_bucket, target_key, err)
        };

        match fs::metadata(&source).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => {
                return Err(ObjectStoreError::NotFound {
                    bucket: source_bucket.to_string(),
                    key: source_key.to_string(),
                });
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ObjectStoreError::NotFound {
                    bucket: source_bucket.to_string(),
                    key: source_key.to_string(),
                });
            }
            Err(err) => {
                return Err(ObjectStoreError::transport(
                    "copy_object",
                    source_bucket,
                    source_key,
                    err,
                ));
            }
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(failed)?;
        }
        let mut staging = target.clone().into_os_string();
        staging.push(".partial");
        let staging = PathBuf::from(staging);
        fs::copy(&source, &staging).await.map_err(failed)?;
        if let Err(err) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(failed(err));
        }

        debug!(source_bucket, source_key, target_bucket, target_key, "object copied");
        Ok(target_key.to_string())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, ObjectStoreError> {
        let path = self.object_path("object_exists", bucket, key)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(ObjectStoreError::transport(
                "object_exists",
                bucket,
                key,
                err,
            )),
        }
    }
}
