use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::api::handlers;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    // Any origin: the mobile client talks to this server over the LAN.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(vec![Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(vec![axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT]);

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/register", post(handlers::register))
        .route("/analyze", post(handlers::analyze))
        .route("/profiles", get(handlers::list_profiles))
        .route("/profiles/:id", put(handlers::update_profile).delete(handlers::delete_profile))
        .route("/photos/*key", get(handlers::photo))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(cors)
        .with_state(state)
}
