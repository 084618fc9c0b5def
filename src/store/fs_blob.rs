use std::path::{Path, PathBuf};

use tracing::debug;

use super::{BlobStore, StoreError};
use crate::utils::path::resolve_blob_path;

/// Blobs written to a local directory and published through the API's
/// `/photos/*key` route.
pub struct FsBlobStore {
    root: PathBuf,
    public_base: String,
}

impl FsBlobStore {
    pub fn new(root: PathBuf, public_url: &str) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            public_base: format!("{}/photos", public_url.trim_end_matches('/')),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}

impl BlobStore for FsBlobStore {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn upload(&self, key: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let path = resolve_blob_path(&self.root, key).ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        debug!("Stored blob {} ({} bytes)", key, bytes.len());
        Ok(self.public_url(key))
    }
}
