//! Face location and encoding seam.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Embedding, FaceLocation};
use image::RgbImage;
use parking_lot::Mutex;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
}

/// Finds faces in an image and turns them into identity embeddings.
///
/// Both methods return faces in the same order, and that order is whatever
/// the implementation considers its native one. Callers take the first entry.
pub trait FaceEncoder: Send + Sync {
    /// Bounding boxes of every face, trimmed to the image bounds.
    fn face_locations(&self, image: &RgbImage) -> Result<Vec<FaceLocation>, EncoderError>;

    /// One embedding per detected face.
    fn face_encodings(&self, image: &RgbImage) -> Result<Vec<Embedding>, EncoderError>;
}

/// SCRFD detection plus ResNet encoding, each session behind its own lock.
pub struct OnnxFaceEncoder {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
}

impl OnnxFaceEncoder {
    pub fn load(detector_path: &Path, encoder_path: &Path) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(detector_path)?;
        let recognizer = FaceRecognizer::load(encoder_path)?;
        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
        })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn face_locations(&self, image: &RgbImage) -> Result<Vec<FaceLocation>, EncoderError> {
        let faces = self.detector.lock().detect(image)?;
        Ok(faces
            .iter()
            .map(|f| f.to_location().trimmed(image.width(), image.height()))
            .collect())
    }

    fn face_encodings(&self, image: &RgbImage) -> Result<Vec<Embedding>, EncoderError> {
        let faces = self.detector.lock().detect(image)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        let mut recognizer = self.recognizer.lock();
        faces
            .iter()
            .map(|face| recognizer.extract(image, face).map_err(EncoderError::from))
            .collect()
    }
}
