#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::serve;
use facematch_backend::api::routes;
use facematch_backend::db::SqliteProfileStore;
use facematch_backend::matching::MatchingService;
use facematch_backend::recognition::{Descriptor, DescriptorExtractor, ExtractError};
use facematch_backend::store::{FsBlobStore, ProfileStore};
use facematch_backend::{AppPaths, AppState};
use parking_lot::Mutex;
use reqwest::multipart::{Form, Part};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const TOLERANCE: f64 = 0.5;

/// Extractor that only recognises images it has been taught. Anything else is
/// reported as faceless, which is exactly what a real model does with a
/// landscape photo.
#[derive(Default)]
pub struct StubExtractor {
    faces: Mutex<HashMap<Vec<u8>, Descriptor>>,
}

impl StubExtractor {
    pub fn teach(&self, image: &[u8], descriptor: Descriptor) {
        self.faces.lock().insert(image.to_vec(), descriptor);
    }
}

impl DescriptorExtractor for StubExtractor {
    fn name(&self) -> &str {
        "stub"
    }

    fn extract(&self, image: &[u8]) -> Result<Option<Descriptor>, ExtractError> {
        Ok(self.faces.lock().get(image).cloned())
    }
}

/// 128-d descriptor that is all zeros except the first component. Distances
/// between two of these are exact in f64 for dyadic values like 0.125 or 0.5.
pub fn descriptor(first: f64) -> Descriptor {
    let mut d = vec![0.0; 128];
    d[0] = first;
    d
}

pub struct TestServer {
    pub tmp: TempDir,
    pub base_url: String,
    pub client: reqwest::Client,
    pub extractor: Arc<StubExtractor>,
    pub paths: AppPaths,
}

/// Start a server backed by SQLite and the filesystem in a fresh temp dir.
pub async fn spawn_server() -> TestServer {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("db").join("profiles.db");
    let store = SqliteProfileStore::open(&db_path, 2).unwrap();
    spawn_server_with(tmp, Arc::new(store)).await
}

pub async fn spawn_server_with(tmp: TempDir, profiles: Arc<dyn ProfileStore>) -> TestServer {
    spawn_server_limited(tmp, profiles, 1024 * 1024).await
}

pub async fn spawn_server_limited(tmp: TempDir, profiles: Arc<dyn ProfileStore>, max_upload_bytes: usize) -> TestServer {
    let paths = AppPaths {
        data: tmp.path().to_path_buf(),
        blobs: tmp.path().join("blobs"),
        uploads: tmp.path().join("uploads"),
    };
    std::fs::create_dir_all(&paths.uploads).unwrap();

    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = TcpListener::bind(&addr).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let base_url = format!("http://127.0.0.1:{}", port);

    let extractor = Arc::new(StubExtractor::default());
    let blobs = Arc::new(FsBlobStore::new(paths.blobs.clone(), &base_url).unwrap());
    let service = Arc::new(MatchingService::new(extractor.clone(), profiles, blobs, TOLERANCE));
    let state = Arc::new(AppState::new(paths.clone(), service, max_upload_bytes));
    let app = routes::router(state);
    tokio::spawn(async move {
        serve(listener, app.into_make_service()).await.unwrap();
    });

    TestServer {
        tmp,
        base_url,
        client: reqwest::Client::new(),
        extractor,
        paths,
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn register(&self, image: &[u8], filename: &str, fields: &[(&str, &str)]) -> reqwest::Response {
        let mut form = Form::new();
        for (k, v) in fields {
            form = form.text(k.to_string(), v.to_string());
        }
        form = form.part("photo", Part::bytes(image.to_vec()).file_name(filename.to_string()));
        self.client.post(self.url("/register")).multipart(form).send().await.unwrap()
    }

    pub async fn analyze(&self, image: &[u8]) -> reqwest::Response {
        let form = Form::new().part("photo", Part::bytes(image.to_vec()).file_name("query.jpg"));
        self.client.post(self.url("/analyze")).multipart(form).send().await.unwrap()
    }

    pub async fn analyze_json(&self, image: &[u8]) -> serde_json::Value {
        let resp = self.analyze(image).await;
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }

    /// Register and return the created profile id.
    pub async fn register_ok(&self, image: &[u8], name: &str) -> String {
        let resp = self.register(image, "face.jpg", &[("name", name)]).await;
        assert_eq!(resp.status(), 201);
        let body: serde_json::Value = resp.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn list(&self) -> Vec<serde_json::Value> {
        let resp = self.get("/profiles").await;
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }

    pub async fn put_raw(&self, path: &str, body: &str) -> reqwest::Response {
        self.client
            .put(self.url(path))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.client.delete(self.url(path)).send().await.unwrap()
    }

    pub fn blob_count(&self) -> usize {
        count_files(&self.paths.blobs)
    }

    pub fn spooled_uploads(&self) -> usize {
        count_files(&self.paths.uploads)
    }
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|e| {
            let p = e.path();
            if p.is_dir() {
                count_files(&p)
            } else {
                1
            }
        })
        .sum()
}
