use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DETECTOR_MODEL: &str = "det_10g.onnx";
pub const ENCODER_MODEL: &str = "dlib_face_recognition_resnet_model_v1.onnx";
pub const GENDER_MODEL: &str = "gender_net.onnx";
pub const AGE_MODEL: &str = "age_net.onnx";

/// Directory holding the model files (`FACEMATCH_MODEL_DIR`, else `./models`).
pub fn default_model_dir() -> PathBuf {
    std::env::var("FACEMATCH_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("models"))
}

/// Where the models live and which optional classifiers to load.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub gender_enabled: bool,
    pub age_enabled: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            gender_enabled: true,
            age_enabled: true,
        }
    }
}

impl ModelConfig {
    pub fn with_model_dir(model_dir: impl AsRef<Path>) -> Self {
        Self {
            model_dir: model_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn detector_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL)
    }

    pub fn encoder_path(&self) -> PathBuf {
        self.model_dir.join(ENCODER_MODEL)
    }

    pub fn gender_path(&self) -> PathBuf {
        self.model_dir.join(GENDER_MODEL)
    }

    pub fn age_path(&self) -> PathBuf {
        self.model_dir.join(AGE_MODEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths() {
        let cfg = ModelConfig::with_model_dir("/opt/models");
        assert_eq!(cfg.detector_path(), PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(cfg.gender_path(), PathBuf::from("/opt/models/gender_net.onnx"));
        assert_eq!(cfg.age_path(), PathBuf::from("/opt/models/age_net.onnx"));
        assert!(cfg.gender_enabled && cfg.age_enabled);
    }
}
