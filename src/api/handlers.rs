use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use super::error::ApiError;
use super::upload;
use crate::matching::MatchOutcome;
use crate::models::{Profile, ProfileFields};
use crate::utils::path::resolve_blob_path;
use crate::AppState;

pub async fn index() -> &'static str {
    "Face recognition server active."
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "extractor": state.service.extractor_name(),
        "storage": state.service.storage_name(),
        "tolerance": state.service.tolerance(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Profile>), ApiError> {
    let mut form = upload::read_form(multipart, &state.paths.uploads).await?;
    let photo = form.require_photo()?;
    let mut fields = ProfileFields::default();
    for (k, v) in form.fields.drain() {
        fields.set(&k, v);
    }
    let bytes = photo.read().await?;
    let filename = photo.filename.clone();
    let service = state.service.clone();
    let profile = tokio::task::spawn_blocking(move || service.register(&bytes, &filename, fields)).await??;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn analyze(State(state): State<Arc<AppState>>, multipart: Multipart) -> Result<Json<Value>, ApiError> {
    let mut form = upload::read_form(multipart, &state.paths.uploads).await?;
    let photo = form
        .photo
        .take()
        .ok_or_else(|| ApiError::BadRequest("No photo was provided for analysis.".to_string()))?;
    let bytes = photo.read().await?;
    let service = state.service.clone();
    let outcome = tokio::task::spawn_blocking(move || service.analyze(&bytes)).await??;
    let body = match outcome {
        MatchOutcome::Matched(profile) => json!({ "match": true, "profile": profile }),
        MatchOutcome::NoMatch(reason) => json!({
            "match": false,
            "reason": reason,
            "message": reason.message(),
        }),
    };
    Ok(Json(body))
}

pub async fn list_profiles(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Profile>>, ApiError> {
    let service = state.service.clone();
    let profiles = tokio::task::spawn_blocking(move || service.list()).await??;
    Ok(Json(profiles))
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    // An empty or non-JSON body is reported the same way as `{}`.
    let patch: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Request body must be a JSON object: {}", e)))?
    };
    let service = state.service.clone();
    let target = id.clone();
    tokio::task::spawn_blocking(move || service.update(&target, &patch)).await??;
    Ok(Json(json!({ "success": true, "message": format!("Profile {} updated.", id) })))
}

pub async fn delete_profile(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let service = state.service.clone();
    let target = id.clone();
    tokio::task::spawn_blocking(move || service.delete(&target)).await??;
    Ok(Json(json!({ "success": true, "message": format!("Profile {} deleted.", id) })))
}

pub async fn photo(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    let Some(path) = resolve_blob_path(&state.paths.blobs, &key) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [
                    (header::CONTENT_TYPE, mime.to_string()),
                    (header::CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
                ],
                bytes,
            )
                .into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
