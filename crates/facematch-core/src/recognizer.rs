//! 128-d face encoder via ONNX Runtime.
//!
//! Runs the dlib ResNet face-recognition network (exported to ONNX) on an
//! aligned 150x150 RGB chip. Embeddings from this network are compared with
//! plain Euclidean distance; 0.6 is the conventional same-person cut-off.

use crate::alignment::{self, CHIP_SIZE};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Per-channel means (R, G, B) the network was trained with.
const CHANNEL_MEAN: [f32; 3] = [122.782, 117.001, 104.298];
const PIXEL_SCALE: f32 = 256.0;
pub const EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("encoder model not found: {0}")]
    ModelNotFound(String),
    #[error("encoder inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; the detector must supply them for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ResNet face encoder.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the encoder ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face encoder"
        );

        Ok(Self { session })
    }

    /// Align `face` within `image` and compute its embedding.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let chip = alignment::align_face(image, landmarks);
        let input = preprocess(&chip);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(raw.to_vec()))
    }
}

/// Turn an aligned chip into a mean-subtracted 1x3x150x150 tensor.
fn preprocess(chip: &RgbImage) -> Array4<f32> {
    let size = CHIP_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in chip.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - CHANNEL_MEAN[c]) / PIXEL_SCALE;
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_shape() {
        let chip = RgbImage::new(CHIP_SIZE, CHIP_SIZE);
        assert_eq!(preprocess(&chip).shape(), &[1, 3, 150, 150]);
    }

    #[test]
    fn test_preprocess_subtracts_channel_means() {
        let chip = RgbImage::from_pixel(CHIP_SIZE, CHIP_SIZE, Rgb([200, 117, 0]));
        let t = preprocess(&chip);
        assert!((t[[0, 0, 3, 4]] - (200.0 - 122.782) / 256.0).abs() < 1e-6);
        assert!(t[[0, 1, 3, 4]].abs() < 1e-2);
        assert!((t[[0, 2, 3, 4]] + 104.298 / 256.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_model_reported() {
        let err = FaceRecognizer::load(Path::new("/nonexistent/encoder.onnx")).err().unwrap();
        assert!(matches!(err, RecognizerError::ModelNotFound(_)));
    }
}
