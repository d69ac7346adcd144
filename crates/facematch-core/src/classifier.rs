//! Gender and age classifiers (Caffe `gender_net` / `age_net`, run as ONNX).
//!
//! Both networks take a 227x227 BGR blob with fixed per-channel means
//! subtracted and emit a softmax vector over a fixed label set. The reported
//! confidence is the arg-max entry times 100, which is a raw network score
//! rather than a calibrated probability.

use crate::imaging::BgrImage;
use crate::types::Prediction;
use image::imageops::FilterType;
use image::{ImageBuffer, Rgb};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::Path;
use thiserror::Error;

pub const GENDER_LABELS: [&str; 2] = ["Male", "Female"];
pub const AGE_BUCKETS: [&str; 8] = [
    "(0-2)", "(4-6)", "(8-12)", "(15-20)", "(25-32)", "(38-43)", "(48-53)", "(60-100)",
];

pub const BLOB_SIZE: u32 = 227;
/// Means subtracted from the B, G and R planes.
pub const BLOB_MEAN: [f32; 3] = [104.0, 117.0, 123.0];

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("classifier model not found: {0}")]
    ModelNotFound(String),
    #[error("classifier inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty face crop")]
    EmptyInput,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A network mapping a `1x3x227x227` blob to one score per label.
pub trait Classifier: Send + Sync {
    fn forward(&self, blob: &Array4<f32>) -> Result<Vec<f32>, ClassifierError>;
}

/// ONNX export of a Caffe classification network.
pub struct OnnxClassifier {
    session: Mutex<Session>,
}

impl OnnxClassifier {
    pub fn load(model_path: &Path) -> Result<Self, ClassifierError> {
        if !model_path.exists() {
            return Err(ClassifierError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded classifier"
        );

        Ok(Self { session: Mutex::new(session) })
    }
}

impl Classifier for OnnxClassifier {
    fn forward(&self, blob: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(blob.view())?])?;
        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(e.to_string()))?;
        Ok(scores.to_vec())
    }
}

/// A classifier capability that may be missing or switched off.
pub enum ClassifierSlot {
    Loaded(Box<dyn Classifier>),
    /// Model assets were missing or failed to load.
    Unavailable,
    /// Turned off by configuration.
    Disabled,
}

impl ClassifierSlot {
    /// Load `model_path` unless `enabled` is false.
    ///
    /// Load failures degrade to [`ClassifierSlot::Unavailable`] with a warning.
    pub fn load(name: &str, model_path: &Path, enabled: bool) -> Self {
        if !enabled {
            tracing::info!(classifier = name, "disabled by configuration");
            return ClassifierSlot::Disabled;
        }
        match OnnxClassifier::load(model_path) {
            Ok(c) => ClassifierSlot::Loaded(Box::new(c)),
            Err(e) => {
                tracing::warn!(classifier = name, error = %e, "classifier unavailable; reporting Unknown");
                ClassifierSlot::Unavailable
            }
        }
    }

    pub fn state(&self) -> SlotState {
        match self {
            ClassifierSlot::Loaded(_) => SlotState::Loaded,
            ClassifierSlot::Unavailable => SlotState::Unavailable,
            ClassifierSlot::Disabled => SlotState::Disabled,
        }
    }

    /// Classify `face` against `labels`. Never fails; errors become `Unknown`.
    pub fn classify(&self, face: &BgrImage, labels: &[&str]) -> Prediction {
        let classifier = match self {
            ClassifierSlot::Loaded(c) => c,
            ClassifierSlot::Unavailable => return Prediction::unknown(),
            ClassifierSlot::Disabled => return Prediction::disabled(),
        };

        match run(classifier.as_ref(), face, labels) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "classification failed");
                Prediction::unknown()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Loaded,
    Unavailable,
    Disabled,
}

fn run(classifier: &dyn Classifier, face: &BgrImage, labels: &[&str]) -> Result<Prediction, ClassifierError> {
    let blob = blob_from_image(face)?;
    let scores = classifier.forward(&blob)?;
    let (idx, score) = argmax(&scores)
        .ok_or_else(|| ClassifierError::InferenceFailed("empty output".into()))?;
    let label = labels.get(idx).ok_or_else(|| {
        ClassifierError::InferenceFailed(format!("output index {idx} outside {} labels", labels.len()))
    })?;
    Ok(Prediction::new(*label, score * 100.0))
}

/// Resize to 227x227 (bilinear) and subtract [`BLOB_MEAN`], keeping BGR order.
pub fn blob_from_image(face: &BgrImage) -> Result<Array4<f32>, ClassifierError> {
    if face.is_empty() {
        return Err(ClassifierError::EmptyInput);
    }
    // Resizing is channel-agnostic, so the BGR bytes ride in an Rgb buffer.
    let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_raw(face.width, face.height, face.data.clone())
            .ok_or(ClassifierError::EmptyInput)?;
    let resized = image::imageops::resize(&buffer, BLOB_SIZE, BLOB_SIZE, FilterType::Triangle);

    let size = BLOB_SIZE as usize;
    let mut blob = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            blob[[0, c, y as usize, x as usize]] = pixel[c] as f32 - BLOB_MEAN[c];
        }
    }
    Ok(blob)
}

/// Index and value of the largest score. The first wins ties.
fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    struct Fixed(Vec<f32>);

    impl Classifier for Fixed {
        fn forward(&self, blob: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
            assert_eq!(blob.shape(), &[1, 3, 227, 227]);
            Ok(self.0.clone())
        }
    }

    fn face() -> BgrImage {
        BgrImage::from_rgb(&RgbImage::from_pixel(40, 50, Rgb([123, 117, 104])))
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), Some((1, 0.7)));
        assert_eq!(argmax(&[0.5, 0.5]), Some((0, 0.5)));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_blob_subtracts_bgr_means() {
        // RGB (123, 117, 104) is BGR (104, 117, 123): every plane lands on zero.
        let blob = blob_from_image(&face()).unwrap();
        assert_eq!(blob.shape(), &[1, 3, 227, 227]);
        assert!(blob.iter().all(|v| v.abs() < 1.0));
    }

    #[test]
    fn test_blob_keeps_bgr_order() {
        let bgr = BgrImage::from_rgb(&RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])));
        let blob = blob_from_image(&bgr).unwrap();
        // Plane 0 is blue (0), plane 2 is red (255).
        assert!((blob[[0, 0, 100, 100]] + 104.0).abs() < 1.0);
        assert!((blob[[0, 2, 100, 100]] - (255.0 - 123.0)).abs() < 1.0);
    }

    #[test]
    fn test_blob_rejects_empty() {
        let empty = BgrImage { width: 0, height: 0, data: vec![] };
        assert!(matches!(blob_from_image(&empty), Err(ClassifierError::EmptyInput)));
    }

    #[test]
    fn test_loaded_slot_reports_argmax_times_100() {
        let slot = ClassifierSlot::Loaded(Box::new(Fixed(vec![0.2, 0.8])));
        let p = slot.classify(&face(), &GENDER_LABELS);
        assert_eq!(p.label, "Female");
        assert!((p.confidence - 80.0).abs() < 1e-4);
    }

    #[test]
    fn test_age_bucket_selection() {
        let mut scores = vec![0.01f32; 8];
        scores[4] = 0.6;
        let slot = ClassifierSlot::Loaded(Box::new(Fixed(scores)));
        assert_eq!(slot.classify(&face(), &AGE_BUCKETS).label, "(25-32)");
    }

    #[test]
    fn test_out_of_range_index_is_unknown() {
        let slot = ClassifierSlot::Loaded(Box::new(Fixed(vec![0.0, 0.0, 0.9])));
        assert_eq!(slot.classify(&face(), &GENDER_LABELS), Prediction::unknown());
    }

    #[test]
    fn test_unavailable_and_disabled_short_circuit() {
        assert_eq!(ClassifierSlot::Unavailable.classify(&face(), &GENDER_LABELS), Prediction::new("Unknown", 0.0));
        assert_eq!(ClassifierSlot::Disabled.classify(&face(), &AGE_BUCKETS), Prediction::new("Disabled", 0.0));
    }

    #[test]
    fn test_missing_model_file_degrades() {
        let slot = ClassifierSlot::load("gender", Path::new("/nonexistent/gender_net.onnx"), true);
        assert_eq!(slot.state(), SlotState::Unavailable);
        let slot = ClassifierSlot::load("age", Path::new("/nonexistent/age_net.onnx"), false);
        assert_eq!(slot.state(), SlotState::Disabled);
    }
}
