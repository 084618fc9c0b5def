//! Profile matching workflow: register, analyze, and the CRUD around them.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Profile, ProfileFields};
use crate::recognition::{euclidean_distance, Descriptor, DescriptorExtractor};
use crate::store::{BlobStore, ProfileStore, StoreError};
use crate::utils::path::sanitize_filename;

pub const BLOB_PREFIX: &str = "profile_images";

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("no face could be detected in the supplied image")]
    NoFaceDetected,
    #[error("{0}")]
    BadRequest(String),
    #[error("profile {0} not found")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(StoreError),
    #[error("storage unavailable: {0}")]
    BackendUnavailable(String),
}

impl From<StoreError> for MatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(reason) => MatchError::BackendUnavailable(reason),
            other => MatchError::Storage(other),
        }
    }
}

/// Why an analysis produced no match. These are answers, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchReason {
    NoFaceDetected,
    NoProfilesRegistered,
    NoMatchFound,
}

impl NoMatchReason {
    pub fn message(self) -> &'static str {
        match self {
            NoMatchReason::NoFaceDetected => "No face was detected in the submitted image.",
            NoMatchReason::NoProfilesRegistered => "There are no registered profiles in the database.",
            NoMatchReason::NoMatchFound => "No matching profile was found.",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(Profile),
    NoMatch(NoMatchReason),
}

/// Return the first profile, in slice order, whose descriptor lies within
/// `tolerance` (inclusive) of `query`. Later profiles are never inspected once
/// one qualifies, even if they would be closer. Profiles without a descriptor
/// and descriptors of a different length never match.
pub fn first_match<'a>(query: &[f64], profiles: &'a [Profile], tolerance: f64) -> Option<&'a Profile> {
    profiles.iter().find(|p| {
        let Some(stored) = p.descriptor.as_deref() else {
            return false;
        };
        match euclidean_distance(query, stored) {
            Some(d) => {
                debug!("Profile {} at distance {:.4}", p.id, d);
                d <= tolerance
            }
            None => {
                warn!(
                    "Profile {} descriptor length {} differs from query length {}; skipping",
                    p.id,
                    stored.len(),
                    query.len()
                );
                false
            }
        }
    })
}

pub struct MatchingService {
    extractor: Arc<dyn DescriptorExtractor>,
    profiles: Arc<dyn ProfileStore>,
    blobs: Arc<dyn BlobStore>,
    tolerance: f64,
}

impl MatchingService {
    pub fn new(
        extractor: Arc<dyn DescriptorExtractor>,
        profiles: Arc<dyn ProfileStore>,
        blobs: Arc<dyn BlobStore>,
        tolerance: f64,
    ) -> Self {
        Self { extractor, profiles, blobs, tolerance }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn extractor_name(&self) -> &str {
        self.extractor.name()
    }

    pub fn storage_name(&self) -> String {
        format!("{}+{}", self.profiles.name(), self.blobs.name())
    }

    /// Extraction failures count as "no face".
    fn extract(&self, image: &[u8]) -> Option<Descriptor> {
        match self.extractor.extract(image) {
            Ok(Some(d)) if !d.is_empty() => Some(d),
            Ok(_) => None,
            Err(e) => {
                warn!("Descriptor extraction failed ({}): {}", self.extractor.name(), e);
                None
            }
        }
    }

    /// Check the profile store, extract, upload, then write the document, so
    /// a faceless image or a dead store leaves nothing behind. A store failure
    /// after the upload still orphans the blob; that case is logged.
    pub fn register(&self, image: &[u8], filename: &str, fields: ProfileFields) -> Result<Profile, MatchError> {
        self.profiles.ready()?;
        let descriptor = self.extract(image).ok_or(MatchError::NoFaceDetected)?;

        let key = format!(
            "{}/{}-{}",
            BLOB_PREFIX,
            uuid::Uuid::new_v4().simple(),
            sanitize_filename(filename)
        );
        let photo_url = self.blobs.upload(&key, image)?;

        let mut profile = Profile::new(String::new(), fields, photo_url, descriptor);
        match self.profiles.insert(&profile.to_document()) {
            Ok(id) => profile.id = id,
            Err(e) => {
                warn!(
                    "Profile write failed after upload; blob {} is orphaned",
                    profile.photo_url.as_deref().unwrap_or_default()
                );
                return Err(e.into());
            }
        }
        info!(
            "Registered profile {} (descriptor length {})",
            profile.id,
            profile.descriptor.as_ref().map_or(0, Vec::len)
        );
        Ok(profile)
    }

    pub fn analyze(&self, image: &[u8]) -> Result<MatchOutcome, MatchError> {
        let Some(query) = self.extract(image) else {
            return Ok(MatchOutcome::NoMatch(NoMatchReason::NoFaceDetected));
        };

        let candidates: Vec<Profile> = self
            .profiles
            .list()?
            .into_iter()
            .filter(|p| p.descriptor.is_some())
            .collect();
        if candidates.is_empty() {
            return Ok(MatchOutcome::NoMatch(NoMatchReason::NoProfilesRegistered));
        }

        match first_match(&query, &candidates, self.tolerance) {
            Some(p) => {
                info!("Analysis matched profile {}", p.id);
                Ok(MatchOutcome::Matched(p.clone()))
            }
            None => {
                debug!("Analysis found no match among {} profiles", candidates.len());
                Ok(MatchOutcome::NoMatch(NoMatchReason::NoMatchFound))
            }
        }
    }

    /// Every profile with its descriptor removed.
    pub fn list(&self) -> Result<Vec<Profile>, MatchError> {
        Ok(self.profiles.list()?.into_iter().map(Profile::without_descriptor).collect())
    }

    pub fn get(&self, id: &str) -> Result<Profile, MatchError> {
        self.profiles.get(id)?.ok_or_else(|| MatchError::NotFound(id.to_string()))
    }

    /// Overwrite the supplied fields. Nothing is validated and the descriptor
    /// is never recomputed; the only rule is that `id` cannot be changed.
    pub fn update(&self, id: &str, patch: &Value) -> Result<(), MatchError> {
        let fields: Map<String, Value> = match patch {
            Value::Object(m) => m.iter().filter(|(k, _)| k.as_str() != "id").map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => Map::new(),
        };
        if fields.is_empty() {
            return Err(MatchError::BadRequest("No data provided for update.".to_string()));
        }
        if self.profiles.update(id, &fields)? {
            info!("Updated profile {} ({} field(s))", id, fields.len());
            Ok(())
        } else {
            Err(MatchError::NotFound(id.to_string()))
        }
    }

    /// Remove the document. The photo blob is intentionally kept and logged.
    pub fn delete(&self, id: &str) -> Result<(), MatchError> {
        let existing = self.profiles.get(id)?.ok_or_else(|| MatchError::NotFound(id.to_string()))?;
        if !self.profiles.delete(id)? {
            return Err(MatchError::NotFound(id.to_string()));
        }
        match existing.photo_url.as_deref() {
            Some(url) => warn!("Deleted profile {}; photo blob {} left in storage", id, url),
            None => info!("Deleted profile {}", id),
        }
        Ok(())
    }
}
