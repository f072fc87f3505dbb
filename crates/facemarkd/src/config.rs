use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:5500).
    pub bind: String,
    /// Directory served as static files (default: ./public).
    pub public_dir: PathBuf,
    /// JSON catalog path (default: <public>/imageList.json).
    pub catalog_path: PathBuf,
    /// Uploaded image directory (default: <public>/images).
    pub images_dir: PathBuf,
    /// Pretrained model directory handed to the provider (default: <public>/models).
    pub model_dir: PathBuf,
    /// External detector command line. Without it the recognition session is disabled.
    pub provider_cmd: Option<String>,
    /// Maximum Euclidean distance for a positive identity match.
    pub match_threshold: f32,
    /// Request body cap for uploads, in bytes.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from `FACEMARK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let public_dir = var("FACEMARK_PUBLIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./public"));

        let path_or = |key: &str, default: &str| {
            var(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| public_dir.join(default))
        };

        Self {
            bind: var("FACEMARK_BIND").unwrap_or_else(|| "0.0.0.0:5500".to_string()),
            catalog_path: path_or("FACEMARK_CATALOG_PATH", "imageList.json"),
            images_dir: path_or("FACEMARK_IMAGES_DIR", "images"),
            model_dir: path_or("FACEMARK_MODEL_DIR", "models"),
            provider_cmd: var("FACEMARK_PROVIDER_CMD").filter(|v| !v.trim().is_empty()),
            match_threshold: parsed(&var, "FACEMARK_MATCH_THRESHOLD", 0.6),
            max_upload_bytes: parsed(&var, "FACEMARK_MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
            public_dir,
        }
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
