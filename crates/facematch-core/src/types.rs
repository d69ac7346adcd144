use serde::{Deserialize, Serialize};

/// Distance at or below which two embeddings are considered the same person.
///
/// This is the reference library's default tolerance for the 128-d encoder
/// space. It is intentionally not configurable.
pub const SAME_PERSON_TOLERANCE: f32 = 0.6;

pub const UNKNOWN_LABEL: &str = "Unknown";
pub const DISABLED_LABEL: &str = "Disabled";

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Convert to a `(top, right, bottom, left)` location, rounding to whole pixels.
    pub fn to_location(&self) -> FaceLocation {
        FaceLocation {
            top: self.y.round() as i32,
            right: (self.x + self.width).round() as i32,
            bottom: (self.y + self.height).round() as i32,
            left: self.x.round() as i32,
        }
    }
}

/// Face location in `(top, right, bottom, left)` pixel order.
///
/// Coordinates are signed and nothing guarantees `bottom > top` or
/// `right > left`; use [`area`](Self::area) before cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceLocation {
    /// Clip the location to the bounds of a `width` x `height` image.
    pub fn trimmed(&self, width: u32, height: u32) -> FaceLocation {
        FaceLocation {
            top: self.top.max(0),
            right: self.right.min(width as i32),
            bottom: self.bottom.min(height as i32),
            left: self.left.max(0),
        }
    }

    /// Pixel area, zero for inverted or empty boxes.
    pub fn area(&self) -> u64 {
        let w = (self.right - self.left).max(0) as u64;
        let h = (self.bottom - self.top).max(0) as u64;
        w * h
    }
}

/// Face embedding vector (128-dimensional for the dlib ResNet encoder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Compute Euclidean (L2) distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Whether `other` is within `tolerance` of this embedding.
    pub fn matches(&self, other: &Embedding, tolerance: f32) -> bool {
        self.euclidean_distance(other) <= tolerance
    }
}

/// A classifier verdict: arg-max label and its raw score scaled to percent.
///
/// The confidence is the network's arg-max output times 100. It is not a
/// calibrated probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN_LABEL, 0.0)
    }

    pub fn disabled() -> Self {
        Self::new(DISABLED_LABEL, 0.0)
    }
}

/// Per-image analysis: detection outcome, identity embedding and demographics.
///
/// Only the first face the detector reports is analyzed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceAnalysis {
    pub face_detected: bool,
    #[serde(skip)]
    pub embedding: Option<Embedding>,
    pub gender: String,
    pub gender_confidence: f32,
    #[serde(rename = "age")]
    pub age_bucket: String,
    pub age_confidence: f32,
}

impl FaceAnalysis {
    /// Analysis for an image in which no face was found.
    pub fn undetected() -> Self {
        Self {
            face_detected: false,
            embedding: None,
            gender: UNKNOWN_LABEL.to_string(),
            gender_confidence: 0.0,
            age_bucket: UNKNOWN_LABEL.to_string(),
            age_confidence: 0.0,
        }
    }

    /// A detected face whose demographics could not be estimated.
    pub fn detected(embedding: Embedding) -> Self {
        Self {
            face_detected: true,
            embedding: Some(embedding),
            ..Self::undetected()
        }
    }

    pub fn with_demographics(mut self, gender: Prediction, age: Prediction) -> Self {
        self.gender = gender.label;
        self.gender_confidence = round_to(gender.confidence as f64, 1) as f32;
        self.age_bucket = age.label;
        self.age_confidence = round_to(age.confidence as f64, 1) as f32;
        self
    }
}

/// Outcome of comparing two images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub success: bool,
    pub message: String,
    /// `100 * (1 - distance)` rounded to two decimals. Negative for distances above 1.
    pub likelihood: f64,
    pub is_same_person: bool,
    pub analysis1: FaceAnalysis,
    pub analysis2: FaceAnalysis,
}

impl ComparisonResult {
    /// Failure result with every field defaulted.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            likelihood: 0.0,
            is_same_person: false,
            analysis1: FaceAnalysis::undetected(),
            analysis2: FaceAnalysis::undetected(),
        }
    }
}

/// Linear likelihood heuristic over an embedding distance, rounded to two decimals.
pub fn likelihood_from_distance(distance: f32) -> f64 {
    round_to(100.0 * (1.0 - distance as f64), 2)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.1, -0.2, 0.3]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_euclidean_distance_known() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_matches_tolerance_is_inclusive() {
        let a = Embedding::new(vec![0.0]);
        let b = Embedding::new(vec![0.5]);
        assert!(a.matches(&b, 0.5));
        assert!(!a.matches(&b, 0.49));
    }

    #[test]
    fn test_likelihood_from_distance() {
        assert_eq!(likelihood_from_distance(0.0), 100.0);
        assert_eq!(likelihood_from_distance(0.5), 50.0);
        assert_eq!(likelihood_from_distance(0.25), 75.0);
    }

    #[test]
    fn test_likelihood_goes_negative_past_one() {
        assert_eq!(likelihood_from_distance(1.25), -25.0);
    }

    #[test]
    fn test_likelihood_rounds_to_two_decimals() {
        let l = likelihood_from_distance(0.123_456);
        assert!((l - 87.65).abs() < 1e-9, "got {l}");
    }

    #[test]
    fn test_location_trimmed_to_bounds() {
        let loc = FaceLocation { top: -5, right: 120, bottom: 90, left: -1 };
        let t = loc.trimmed(100, 80);
        assert_eq!(t, FaceLocation { top: 0, right: 100, bottom: 80, left: 0 });
    }

    #[test]
    fn test_inverted_location_has_zero_area() {
        let loc = FaceLocation { top: 50, right: 10, bottom: 20, left: 40 };
        assert_eq!(loc.area(), 0);
    }

    #[test]
    fn test_bbox_to_location() {
        let b = BoundingBox {
            x: 10.4, y: 20.6, width: 30.0, height: 40.0,
            confidence: 0.9, landmarks: None,
        };
        assert_eq!(
            b.to_location(),
            FaceLocation { top: 21, right: 40, bottom: 61, left: 10 }
        );
    }

    #[test]
    fn test_demographics_rounded_to_one_decimal() {
        let a = FaceAnalysis::detected(Embedding::new(vec![0.0]))
            .with_demographics(Prediction::new("Female", 87.654), Prediction::new("(25-32)", 41.26));
        assert_eq!(a.gender, "Female");
        assert!((a.gender_confidence - 87.7).abs() < 1e-4);
        assert_eq!(a.age_bucket, "(25-32)");
        assert!((a.age_confidence - 41.3).abs() < 1e-4);
        assert!(a.face_detected);
    }

    #[test]
    fn test_analysis_serializes_without_embedding() {
        let a = FaceAnalysis::detected(Embedding::new(vec![0.5; 128]));
        let json = serde_json::to_value(&a).unwrap();
        assert!(json.get("embedding").is_none());
        assert_eq!(json["age"], "Unknown");
        assert_eq!(json["face_detected"], true);
    }
}
