pub mod utils;
pub mod models;
pub mod recognition;
pub mod store;
pub mod db;
pub mod matching;
pub mod api;

use std::path::PathBuf;
use std::sync::Arc;

use matching::MatchingService;

#[derive(Clone, Debug)]
pub struct AppPaths {
    pub data: PathBuf,
    pub blobs: PathBuf,
    /// Where multipart uploads are spooled while a request is in flight.
    pub uploads: PathBuf,
}

pub struct AppState {
    pub started_at: std::time::Instant,
    pub paths: AppPaths,
    pub service: Arc<MatchingService>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(paths: AppPaths, service: Arc<MatchingService>, max_upload_bytes: usize) -> Self {
        Self {
            started_at: std::time::Instant::now(),
            paths,
            service,
            max_upload_bytes,
        }
    }
}
