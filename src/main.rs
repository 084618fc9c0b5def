use std::net::SocketAddr;
use std::sync::Arc;

use facematch_backend::db::SqliteProfileStore;
use facematch_backend::matching::MatchingService;
use facematch_backend::recognition;
use facematch_backend::store::{FsBlobStore, ProfileStore, UnavailableStore};
use facematch_backend::utils::config::Config;
use facematch_backend::utils::logging;
use facematch_backend::{AppPaths, AppState};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cfg = Config::from_env();

    let paths = AppPaths {
        data: cfg.data.clone(),
        blobs: cfg.blob_dir(),
        uploads: cfg.upload_dir(),
    };
    std::fs::create_dir_all(&paths.uploads)?;

    // Without a profile database the server still answers, with 5xx on every
    // storage-backed route.
    let profiles: Arc<dyn ProfileStore> = match SqliteProfileStore::open(cfg.db_path(), cfg.db_pool_size) {
        Ok(store) => {
            info!("Profile store ready at {:?}", cfg.db_path());
            Arc::new(store)
        }
        Err(e) => {
            error!("Profile store unavailable ({:?}): {}", cfg.db_path(), e);
            Arc::new(UnavailableStore::new(e.to_string()))
        }
    };
    let blobs = Arc::new(FsBlobStore::new(paths.blobs.clone(), &cfg.public_url)?);

    // The remote extractor owns a blocking HTTP client, which must not be
    // built on an async worker.
    let extractor = {
        let cfg = cfg.clone();
        tokio::task::spawn_blocking(move || recognition::build_extractor(&cfg)).await?
    };

    let tolerance = cfg.tolerance_for(extractor.as_ref());
    let service = Arc::new(MatchingService::new(extractor, profiles, blobs, tolerance));
    info!(
        "Matching with tolerance {} using extractor '{}' and storage '{}'",
        service.tolerance(),
        service.extractor_name(),
        service.storage_name()
    );

    let state = Arc::new(AppState::new(paths, service, cfg.max_upload_bytes));
    let app = facematch_backend::api::routes::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
