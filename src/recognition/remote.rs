use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use tracing::debug;

use super::{Descriptor, DescriptorExtractor, ExtractError};

/// Talks to an external encoding service.
///
/// The service receives the raw image as `application/octet-stream` and
/// answers `{"descriptors": [[f64, ...], ...]}`, one entry per detected face
/// in the service's own order. The first entry is used.
pub struct RemoteExtractor {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct EncodeReply {
    #[serde(default)]
    descriptors: Vec<Descriptor>,
}

impl RemoteExtractor {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, ExtractError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

impl DescriptorExtractor for RemoteExtractor {
    fn name(&self) -> &str {
        "remote"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Option<Descriptor>, ExtractError> {
        // Reject undecodable uploads locally instead of paying a round trip.
        image::load_from_memory(bytes)?;

        let resp = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"))
            .body(bytes.to_vec())
            .send()?;
        if !resp.status().is_success() {
            return Err(ExtractError::Status(resp.status().as_u16()));
        }
        let reply: EncodeReply = resp.json()?;
        debug!("Encoder found {} face(s)", reply.descriptors.len());
        Ok(reply.descriptors.into_iter().next().filter(|d| !d.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::io::Cursor;

    fn png_1x1() -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(1, 1)
            .write_to(&mut out, image::ImageOutputFormat::Png)
            .unwrap();
        out.into_inner()
    }

    /// Encoder stand-in on its own runtime thread; returns its base URL.
    fn spawn_encoder() -> String {
        let app = Router::new()
            .route(
                "/two",
                post(|| async { Json(json!({ "descriptors": [[0.5, 0.25], [9.0, 9.0]] })) }),
            )
            .route("/none", post(|| async { Json(json!({ "descriptors": [] })) }))
            .route("/blank", post(|| async { Json(json!({ "descriptors": [[]] })) }))
            .route("/down", post(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .route(
                "/echo",
                post(|headers: HeaderMap, body: Bytes| async move {
                    let octets = headers
                        .get("content-type")
                        .is_some_and(|v| v == "application/octet-stream");
                    Json(json!({ "descriptors": [[body.len() as f64, if octets { 1.0 } else { 0.0 }]] }))
                }),
            );
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                tx.send(listener.local_addr().unwrap()).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });
        format!("http://{}", rx.recv().unwrap())
    }

    fn extractor(base: &str, path: &str) -> RemoteExtractor {
        RemoteExtractor::new(format!("{}{}", base, path), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_encoder_replies() {
        let base = spawn_encoder();
        let png = png_1x1();

        // first face in the encoder's order wins
        assert_eq!(extractor(&base, "/two").extract(&png).unwrap(), Some(vec![0.5, 0.25]));
        assert_eq!(extractor(&base, "/none").extract(&png).unwrap(), None);
        assert_eq!(extractor(&base, "/blank").extract(&png).unwrap(), None);
        assert!(matches!(
            extractor(&base, "/down").extract(&png),
            Err(ExtractError::Status(503))
        ));
        assert_eq!(
            extractor(&base, "/echo").extract(&png).unwrap(),
            Some(vec![png.len() as f64, 1.0])
        );
    }

    #[test]
    fn test_garbage_bytes_fail_before_any_request() {
        // Port 9 (discard) on localhost: if a request were made it would fail
        // with an Http error, not an Image error.
        let x = RemoteExtractor::new("http://127.0.0.1:9/encode".into(), Duration::from_secs(1)).unwrap();
        let err = x.extract(b"NOT AN IMAGE FILE").unwrap_err();
        assert!(matches!(err, ExtractError::Image(_)), "{err}");
    }

    #[test]
    fn test_reply_parsing() {
        let reply: EncodeReply = serde_json::from_str(r#"{"descriptors": [[0.5, 0.25], [1.0, 2.0]]}"#).unwrap();
        assert_eq!(reply.descriptors.len(), 2);
        assert_eq!(reply.descriptors[0], vec![0.5, 0.25]);

        let empty: EncodeReply = serde_json::from_str("{}").unwrap();
        assert!(empty.descriptors.is_empty());
    }
}
