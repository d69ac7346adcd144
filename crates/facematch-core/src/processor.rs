//! Face analysis and pairwise comparison.
//!
//! [`FaceProcessor`] owns the encoder and the two demographic classifier
//! slots. It is built once at startup and shared across requests; every model
//! handle serializes its own forward passes, so `&self` is all callers need.

use crate::classifier::{ClassifierSlot, SlotState, AGE_BUCKETS, GENDER_LABELS};
use crate::config::ModelConfig;
use crate::encoder::{EncoderError, FaceEncoder, OnnxFaceEncoder};
use crate::imaging::{self, BgrImage};
use crate::types::{
    likelihood_from_distance, ComparisonResult, FaceAnalysis, Prediction, SAME_PERSON_TOLERANCE,
};
use image::RgbImage;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::thread;
use thiserror::Error;

pub const MSG_SAME_PERSON: &str = "These images are of the same person.";
pub const MSG_DIFFERENT_PERSON: &str = "These images are not of the same person.";
pub const MSG_NO_FACE_BOTH: &str = "Could not detect a face in both of the images.";
pub const MSG_NO_FACE_1: &str = "Could not detect a face in image 1.";
pub const MSG_NO_FACE_2: &str = "Could not detect a face in image 2.";

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("{0}")]
    Panicked(String),
}

/// State of the optional classifiers.
///
/// The detector and encoder are not listed: [`FaceProcessor::load`] fails
/// without them, so a running processor always has both.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub gender: SlotState,
    pub age: SlotState,
}

pub struct FaceProcessor {
    encoder: Box<dyn FaceEncoder>,
    gender: ClassifierSlot,
    age: ClassifierSlot,
}

impl FaceProcessor {
    pub fn new(encoder: Box<dyn FaceEncoder>, gender: ClassifierSlot, age: ClassifierSlot) -> Self {
        Self { encoder, gender, age }
    }

    /// Load every model named by `config`.
    ///
    /// The detector and encoder are required. Missing classifiers degrade.
    pub fn load(config: &ModelConfig) -> Result<Self, ProcessorError> {
        tracing::info!(model_dir = %config.model_dir.display(), "loading models");

        let encoder = OnnxFaceEncoder::load(&config.detector_path(), &config.encoder_path())?;
        let gender = ClassifierSlot::load("gender", &config.gender_path(), config.gender_enabled);
        let age = ClassifierSlot::load("age", &config.age_path(), config.age_enabled);

        let processor = Self::new(Box::new(encoder), gender, age);
        let status = processor.status();
        tracing::info!(gender = ?status.gender, age = ?status.age, "face processor ready");
        Ok(processor)
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus {
            gender: self.gender.state(),
            age: self.age.state(),
        }
    }

    pub fn detect_gender(&self, face: &BgrImage) -> Prediction {
        self.gender.classify(face, &GENDER_LABELS)
    }

    pub fn detect_age(&self, face: &BgrImage) -> Prediction {
        self.age.classify(face, &AGE_BUCKETS)
    }

    /// Analyze the first face in `image`, logging encoder failures as no face.
    ///
    /// Comparisons go through [`try_analyze_face`](Self::try_analyze_face)
    /// instead, so that encoder failures reach the caller.
    pub fn analyze_face(&self, image: &RgbImage) -> FaceAnalysis {
        match self.try_analyze_face(image) {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::warn!(error = %e, "face analysis failed");
                FaceAnalysis::undetected()
            }
        }
    }

    /// Analyze the first face in `image`.
    ///
    /// Encoder errors are returned. Cropping and classification never fail;
    /// they degrade to `Unknown` demographics.
    pub fn try_analyze_face(&self, image: &RgbImage) -> Result<FaceAnalysis, ProcessorError> {
        let mut encodings = self.encoder.face_encodings(image)?;
        let locations = self.encoder.face_locations(image)?;

        if encodings.is_empty() || locations.is_empty() {
            tracing::debug!(
                encodings = encodings.len(),
                locations = locations.len(),
                "no face found"
            );
            return Ok(FaceAnalysis::undetected());
        }

        let embedding = encodings.swap_remove(0);
        let location = locations[0];

        let Some(crop) = imaging::crop_face(image, &location) else {
            tracing::debug!(?location, "degenerate face crop; skipping demographics");
            return Ok(FaceAnalysis::detected(embedding));
        };

        let face = BgrImage::from_rgb(&crop);
        let gender = self.detect_gender(&face);
        let age = self.detect_age(&face);
        tracing::debug!(?location, gender = %gender.label, age = %age.label, "face analyzed");

        Ok(FaceAnalysis::detected(embedding).with_demographics(gender, age))
    }

    /// Open and analyze a single image file. Panics come back as errors.
    pub fn analyze_path(&self, path: &Path) -> Result<FaceAnalysis, ProcessorError> {
        contain(|| {
            let image = imaging::open_image(path)?;
            self.try_analyze_face(&image)
        })
    }

    /// Compare the first face in each of two image files.
    pub fn compare_faces(&self, path1: &Path, path2: &Path) -> ComparisonResult {
        guarded(|| {
            let image1 = imaging::open_image(path1)?;
            let image2 = imaging::open_image(path2)?;
            self.compare_decoded(&image1, &image2)
        })
    }

    /// Compare two encoded images held in memory.
    pub fn compare_bytes(&self, data1: &[u8], data2: &[u8]) -> ComparisonResult {
        guarded(|| {
            let image1 = imaging::decode_image(data1)?;
            let image2 = imaging::decode_image(data2)?;
            self.compare_decoded(&image1, &image2)
        })
    }

    /// Compare two decoded images.
    pub fn compare_images(&self, image1: &RgbImage, image2: &RgbImage) -> ComparisonResult {
        guarded(|| self.compare_decoded(image1, image2))
    }

    fn compare_decoded(
        &self,
        image1: &RgbImage,
        image2: &RgbImage,
    ) -> Result<ComparisonResult, ProcessorError> {
        let (analysis1, analysis2) = thread::scope(|s| {
            let second = s.spawn(|| self.try_analyze_face(image2));
            let first = self.try_analyze_face(image1);
            match second.join() {
                Ok(a) => (first, a),
                Err(payload) => panic::resume_unwind(payload),
            }
        });
        let (analysis1, analysis2) = (analysis1?, analysis2?);

        let undetected = match (analysis1.face_detected, analysis2.face_detected) {
            (false, false) => Some(MSG_NO_FACE_BOTH),
            (false, true) => Some(MSG_NO_FACE_1),
            (true, false) => Some(MSG_NO_FACE_2),
            (true, true) => None,
        };
        if let Some(message) = undetected {
            tracing::info!(reason = message, "comparison incomplete");
            return Ok(ComparisonResult {
                analysis1,
                analysis2,
                ..ComparisonResult::failure(message)
            });
        }

        let (Some(e1), Some(e2)) = (&analysis1.embedding, &analysis2.embedding) else {
            return Ok(ComparisonResult::failure("Error processing images: missing face embedding"));
        };

        let distance = e1.euclidean_distance(e2);
        let is_same_person = e1.matches(e2, SAME_PERSON_TOLERANCE);
        let likelihood = likelihood_from_distance(distance);
        tracing::info!(distance, likelihood, is_same_person, "faces compared");

        Ok(ComparisonResult {
            success: true,
            message: if is_same_person { MSG_SAME_PERSON } else { MSG_DIFFERENT_PERSON }.to_string(),
            likelihood,
            is_same_person,
            analysis1,
            analysis2,
        })
    }
}

/// Run `f`, turning a panic into [`ProcessorError::Panicked`].
fn contain<T>(f: impl FnOnce() -> Result<T, ProcessorError>) -> Result<T, ProcessorError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(ProcessorError::Panicked(panic_message(payload))))
}

/// Run a comparison, folding errors and panics into a failure result.
fn guarded(f: impl FnOnce() -> Result<ComparisonResult, ProcessorError>) -> ComparisonResult {
    contain(f).unwrap_or_else(|e| {
        tracing::error!(error = %e, "comparison failed");
        ComparisonResult::failure(format!("Error processing images: {e}"))
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "internal error".to_string()
    }
}
