use facematch_core::config::default_model_dir;
use facematch_core::ModelConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Server configuration.
///
/// Layered: defaults, then an optional TOML file, then `FACEMATCH_*`
/// environment variables, then command-line flags (applied in `main`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to bind (default: 0.0.0.0).
    pub host: String,
    /// Port to bind (default: 5000).
    pub port: u16,
    /// Scratch directory for uploaded images, also served at `/static/uploads`.
    pub upload_dir: PathBuf,
    /// Request body cap in bytes (default: 16 MiB).
    pub max_upload_bytes: usize,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub gender_enabled: bool,
    pub age_enabled: bool,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            upload_dir: PathBuf::from("static/uploads"),
            max_upload_bytes: 16 * 1024 * 1024,
            model_dir: default_model_dir(),
            gender_enabled: true,
            age_enabled: true,
            debug: false,
        }
    }
}

impl Config {
    /// Read a TOML file, or fall back to defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply `FACEMATCH_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("FACEMATCH_HOST") {
            self.host = host;
        }
        if let Some(dir) = lookup("FACEMATCH_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("FACEMATCH_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        self.port = parsed(&lookup, "FACEMATCH_PORT").unwrap_or(self.port);
        self.max_upload_bytes =
            parsed(&lookup, "FACEMATCH_MAX_UPLOAD_BYTES").unwrap_or(self.max_upload_bytes);
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            model_dir: self.model_dir.clone(),
            gender_enabled: self.gender_enabled,
            age_enabled: self.age_enabled,
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:5000");
        assert_eq!(cfg.upload_dir, PathBuf::from("static/uploads"));
        assert_eq!(cfg.max_upload_bytes, 16_777_216);
    }

    #[test]
    fn test_toml_partial_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facematch.toml");
        std::fs::write(&path, "port = 8080\nage_enabled = false\n").unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(!cfg.age_enabled);
        assert!(cfg.gender_enabled);
        assert_eq!(cfg.host, "0.0.0.0");
    }

    #[test]
    fn test_missing_toml_is_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/facematch.toml"))).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FACEMATCH_HOST", "127.0.0.1"),
            ("FACEMATCH_PORT", "9000"),
            ("FACEMATCH_MAX_UPLOAD_BYTES", "not-a-number"),
            ("FACEMATCH_MODEL_DIR", "/srv/models"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_env_with(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.bind_addr(), "127.0.0.1:9000");
        assert_eq!(cfg.max_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(cfg.model_config().model_dir, PathBuf::from("/srv/models"));
    }
}
