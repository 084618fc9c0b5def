//! Face descriptor extraction.
//!
//! The extractor is a black box: image bytes in, a fixed-length descriptor
//! (or nothing, when no face is found) out. Which face wins when an image holds
//! several is up to each implementation.

pub mod remote;
#[cfg(feature = "facial-recognition")]
pub mod onnx;

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::utils::config::{Config, DEFAULT_TOLERANCE};

/// Ordered real-valued face descriptor. Length is fixed per extractor model
/// (128 for dlib-style encoders, 512 for ArcFace).
pub type Descriptor = Vec<f64>;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("image could not be decoded: {0}")]
    Image(#[from] image::ImageError),
    #[error("encoder request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("encoder returned HTTP {0}")]
    Status(u16),
    #[error("model error: {0}")]
    Model(String),
    #[error("no extractor configured")]
    Unconfigured,
}

pub trait DescriptorExtractor: Send + Sync {
    /// Short label for logs and `/health`.
    fn name(&self) -> &str;

    /// `Ok(None)` means the image decoded fine but contains no face.
    fn extract(&self, image: &[u8]) -> Result<Option<Descriptor>, ExtractError>;

    /// Match distance to use when none is configured. The default suits
    /// 128-d dlib-style encodings.
    fn default_tolerance(&self) -> f64 {
        DEFAULT_TOLERANCE
    }
}

/// Euclidean distance, or `None` when the descriptors differ in length.
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    Some(
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>()
            .sqrt(),
    )
}

/// Stand-in used when neither a local model nor a remote encoder is
/// configured. Every image is reported as faceless.
pub struct UnavailableExtractor;

impl DescriptorExtractor for UnavailableExtractor {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn extract(&self, _image: &[u8]) -> Result<Option<Descriptor>, ExtractError> {
        Err(ExtractError::Unconfigured)
    }
}

/// Pick the extractor for this process: the local ONNX models when compiled
/// in and present, else the remote encoder, else [`UnavailableExtractor`].
///
/// Builds a blocking HTTP client, so call it off the async runtime.
pub fn build_extractor(cfg: &Config) -> Arc<dyn DescriptorExtractor> {
    #[cfg(feature = "facial-recognition")]
    {
        match onnx::OnnxExtractor::load(&cfg.models_dir) {
            Ok(x) => {
                info!("Using local ONNX face models from {:?}", cfg.models_dir);
                return Arc::new(x);
            }
            Err(e) => warn!("Local face models not loaded: {}", e),
        }
    }

    if let Some(url) = &cfg.extractor_url {
        match remote::RemoteExtractor::new(url.clone(), cfg.extractor_timeout) {
            Ok(x) => {
                info!("Using remote face encoder at {}", url);
                return Arc::new(x);
            }
            Err(e) => warn!("Remote face encoder not usable: {}", e),
        }
    }

    warn!("No face extractor configured; every image will be reported as having no face");
    Arc::new(UnavailableExtractor)
}
