//! Persistence seams: a document store for profiles and a blob store for the
//! photos they point at.

pub mod fs_blob;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::Profile;

pub use fs_blob::FsBlobStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Flat collection of profile documents keyed by a store-assigned id.
pub trait ProfileStore: Send + Sync {
    fn name(&self) -> &str;

    /// Fails when the backend cannot take writes at all. Checked before any
    /// side effect elsewhere, so a dead store never collects orphan blobs.
    fn ready(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Persist a new document and return the id assigned to it.
    fn insert(&self, doc: &Map<String, Value>) -> Result<String, StoreError>;

    fn get(&self, id: &str) -> Result<Option<Profile>, StoreError>;

    /// Every profile, in the store's iteration order.
    fn list(&self) -> Result<Vec<Profile>, StoreError>;

    /// Shallow-merge `patch` into an existing document. `false` when the id is
    /// unknown.
    fn update(&self, id: &str, patch: &Map<String, Value>) -> Result<bool, StoreError>;

    /// `false` when the id is unknown.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

pub trait BlobStore: Send + Sync {
    fn name(&self) -> &str;

    /// Store `bytes` under `key` and return a publicly retrievable URL.
    fn upload(&self, key: &str, bytes: &[u8]) -> Result<String, StoreError>;
}

/// Profile store used when the real backend failed to initialise. Every call
/// reports [`StoreError::Unavailable`], so the service degrades to 5xx answers
/// instead of refusing to start.
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    fn err(&self) -> StoreError {
        StoreError::Unavailable(self.reason.clone())
    }
}

impl ProfileStore for UnavailableStore {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn ready(&self) -> Result<(), StoreError> {
        Err(self.err())
    }

    fn insert(&self, _doc: &Map<String, Value>) -> Result<String, StoreError> {
        Err(self.err())
    }

    fn get(&self, _id: &str) -> Result<Option<Profile>, StoreError> {
        Err(self.err())
    }

    fn list(&self) -> Result<Vec<Profile>, StoreError> {
        Err(self.err())
    }

    fn update(&self, _id: &str, _patch: &Map<String, Value>) -> Result<bool, StoreError> {
        Err(self.err())
    }

    fn delete(&self, _id: &str) -> Result<bool, StoreError> {
        Err(self.err())
    }
}
