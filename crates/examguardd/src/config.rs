use anyhow::Context;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by
/// `EXAMGUARD_CONFIG`, then `EXAMGUARD_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:8502).
    pub bind_addr: SocketAddr,
    /// Directory containing det_10g.onnx and w600k_r50.onnx.
    pub model_dir: PathBuf,
    /// Directory holding the registry and anomaly model files.
    pub data_dir: PathBuf,
    /// Maximum Euclidean distance for a verification match.
    pub match_threshold: f32,
    /// Distance at or below which a new registration is a duplicate.
    pub duplicate_tolerance: f32,
    /// Decision scores below `-anomaly_threshold` are always flagged.
    pub anomaly_threshold: f64,
    /// Registrations below this quality score are rejected.
    pub min_quality: f32,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8502)),
            model_dir: PathBuf::from("models"),
            data_dir: PathBuf::from("data"),
            match_threshold: examguard_core::DEFAULT_MATCH_THRESHOLD,
            duplicate_tolerance: examguard_core::registry::DUPLICATE_TOLERANCE,
            anomaly_threshold: examguard_core::anomaly::DEFAULT_ANOMALY_THRESHOLD,
            min_quality: examguard_core::quality::MIN_REGISTRATION_QUALITY,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("EXAMGUARD_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn apply_env(&mut self) {
        if let Some(addr) = env_parse("EXAMGUARD_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(dir) = std::env::var("EXAMGUARD_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("EXAMGUARD_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        self.match_threshold = env_parse("EXAMGUARD_MATCH_THRESHOLD").unwrap_or(self.match_threshold);
        self.duplicate_tolerance =
            env_parse("EXAMGUARD_DUPLICATE_TOLERANCE").unwrap_or(self.duplicate_tolerance);
        self.anomaly_threshold =
            env_parse("EXAMGUARD_ANOMALY_THRESHOLD").unwrap_or(self.anomaly_threshold);
        self.min_quality = env_parse("EXAMGUARD_MIN_QUALITY").unwrap_or(self.min_quality);
        self.max_upload_bytes = env_parse("EXAMGUARD_MAX_UPLOAD_BYTES").unwrap_or(self.max_upload_bytes);
    }

    /// Path to the enrolled-face registry.
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("known_faces").join("registry.json")
    }

    /// Path to the persisted anomaly model.
    pub fn anomaly_model_path(&self) -> PathBuf {
        self.data_dir.join("anomaly_model.json")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr.port(), 8502);
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.duplicate_tolerance, 0.5);
        assert_eq!(config.max_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(config.registry_path(), Path::new("data/known_faces/registry.json"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            data_dir = "/var/lib/examguard"
            match_threshold = 0.45
            "#,
        )
        .unwrap();
        assert_eq!(config.match_threshold, 0.45);
        assert_eq!(config.anomaly_model_path(), Path::new("/var/lib/examguard/anomaly_model.json"));
        assert_eq!(config.min_quality, 0.5);
    }

    #[test]
    fn test_bad_toml_is_error() {
        assert!(Config::from_toml("match_threshold = \"high\"").is_err());
    }
}
