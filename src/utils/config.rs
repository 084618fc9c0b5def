use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::recognition::DescriptorExtractor;

pub const DEFAULT_TOLERANCE: f64 = 0.5;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub data: PathBuf,
    /// Maximum Euclidean distance at which two descriptors are the same person.
    /// `None` defers to the extractor, see [`Config::tolerance_for`].
    pub tolerance: Option<f64>,
    /// Base URL under which uploaded photos are publicly reachable.
    pub public_url: String,
    pub extractor_url: Option<String>,
    pub extractor_timeout: Duration,
    pub models_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub db_pool_size: u32,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env::var("FACEMATCH_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(5000);
        let data = PathBuf::from(env::var("FACEMATCH_DATA").unwrap_or_else(|_| "./facematch-data".to_string()));
        let tolerance = env::var("FACEMATCH_TOLERANCE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|t| t.is_finite() && *t >= 0.0);
        let public_url = env::var("FACEMATCH_PUBLIC_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("http://localhost:{}", port));
        let extractor_url = env::var("FACEMATCH_EXTRACTOR_URL").ok().filter(|v| !v.is_empty());
        let extractor_timeout = env::var("FACEMATCH_EXTRACTOR_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));
        let models_dir = env::var("FACEMATCH_MODELS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data.join("models"));
        let max_upload_bytes = env::var("FACEMATCH_MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        let db_pool_size = env::var("FACEMATCH_DB_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(4);
        Self {
            port,
            data,
            tolerance,
            public_url,
            extractor_url,
            extractor_timeout,
            models_dir,
            max_upload_bytes,
            db_pool_size,
        }
    }

    /// The configured tolerance, else the one suited to `extractor`'s
    /// descriptors.
    pub fn tolerance_for(&self, extractor: &dyn DescriptorExtractor) -> f64 {
        self.tolerance.unwrap_or_else(|| extractor.default_tolerance())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data.join("db").join("profiles.db")
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.data.join("blobs")
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.data.join("uploads")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: &[&str] = &[
        "FACEMATCH_PORT",
        "FACEMATCH_DATA",
        "FACEMATCH_TOLERANCE",
        "FACEMATCH_PUBLIC_URL",
        "FACEMATCH_EXTRACTOR_URL",
        "FACEMATCH_EXTRACTOR_TIMEOUT_SECS",
        "FACEMATCH_MODELS_DIR",
        "FACEMATCH_MAX_UPLOAD_BYTES",
        "FACEMATCH_DB_POOL_SIZE",
    ];

    fn clear_vars(vars: &[&str]) -> Vec<(String, Option<String>)> {
        let mut saved = Vec::new();
        for &k in vars {
            let prev = env::var(k).ok();
            saved.push((k.to_string(), prev));
            env::remove_var(k);
        }
        saved
    }

    fn restore_vars(saved: Vec<(String, Option<String>)>) {
        for (k, v) in saved {
            if let Some(val) = v {
                env::set_var(k, val);
            } else {
                env::remove_var(k);
            }
        }
    }

    // Both phases live in one test so parallel test threads never race on the
    // process environment.
    #[test]
    fn test_config_defaults_and_overrides() {
        let saved = clear_vars(VARS);

        let config = Config::from_env();
        assert_eq!(config.port, 5000);
        assert_eq!(config.data, PathBuf::from("./facematch-data"));
        assert_eq!(config.tolerance, None);
        assert_eq!(config.public_url, "http://localhost:5000");
        assert_eq!(config.extractor_url, None);
        assert_eq!(config.extractor_timeout, Duration::from_secs(30));
        assert_eq!(config.models_dir, PathBuf::from("./facematch-data").join("models"));
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(config.db_pool_size, 4);

        env::set_var("FACEMATCH_PORT", "8080");
        env::set_var("FACEMATCH_DATA", "/srv/facematch");
        env::set_var("FACEMATCH_TOLERANCE", "0.6");
        env::set_var("FACEMATCH_EXTRACTOR_URL", "http://encoder:9000/encode");
        env::set_var("FACEMATCH_EXTRACTOR_TIMEOUT_SECS", "5");
        env::set_var("FACEMATCH_MAX_UPLOAD_BYTES", "1024");
        env::set_var("FACEMATCH_DB_POOL_SIZE", "0");

        let config = Config::from_env();
        assert_eq!(config.port, 8080);
        assert_eq!(config.data, PathBuf::from("/srv/facematch"));
        assert_eq!(config.tolerance, Some(0.6));
        assert_eq!(config.public_url, "http://localhost:8080");
        assert_eq!(config.extractor_url.as_deref(), Some("http://encoder:9000/encode"));
        assert_eq!(config.extractor_timeout, Duration::from_secs(5));
        assert_eq!(config.models_dir, PathBuf::from("/srv/facematch/models"));
        assert_eq!(config.max_upload_bytes, 1024);
        // zero is not a usable pool size
        assert_eq!(config.db_pool_size, 4);

        env::set_var("FACEMATCH_TOLERANCE", "-1");
        env::set_var("FACEMATCH_PUBLIC_URL", "https://faces.example.org");
        let config = Config::from_env();
        assert_eq!(config.tolerance, None);
        assert_eq!(config.public_url, "https://faces.example.org");

        restore_vars(saved);
    }

    #[test]
    fn test_tolerance_follows_extractor_unless_set() {
        use crate::recognition::{Descriptor, ExtractError, UnavailableExtractor};

        struct UnitVectors;
        impl DescriptorExtractor for UnitVectors {
            fn name(&self) -> &str {
                "unit"
            }
            fn extract(&self, _image: &[u8]) -> Result<Option<Descriptor>, ExtractError> {
                Ok(None)
            }
            fn default_tolerance(&self) -> f64 {
                1.1
            }
        }

        let mut config = Config {
            port: 1,
            data: PathBuf::from("/data"),
            tolerance: None,
            public_url: String::new(),
            extractor_url: None,
            extractor_timeout: Duration::from_secs(1),
            models_dir: PathBuf::from("/data/models"),
            max_upload_bytes: 1,
            db_pool_size: 1,
        };
        assert_eq!(config.tolerance_for(&UnavailableExtractor), DEFAULT_TOLERANCE);
        assert_eq!(config.tolerance_for(&UnitVectors), 1.1);

        config.tolerance = Some(0.6);
        assert_eq!(config.tolerance_for(&UnitVectors), 0.6);
    }

    #[test]
    fn test_derived_paths() {
        let config = Config {
            port: 1,
            data: PathBuf::from("/data"),
            tolerance: None,
            public_url: String::new(),
            extractor_url: None,
            extractor_timeout: Duration::from_secs(1),
            models_dir: PathBuf::from("/data/models"),
            max_upload_bytes: 1,
            db_pool_size: 1,
        };
        assert_eq!(config.db_path(), PathBuf::from("/data/db/profiles.db"));
        assert_eq!(config.blob_dir(), PathBuf::from("/data/blobs"));
        assert_eq!(config.upload_dir(), PathBuf::from("/data/uploads"));
    }
}
