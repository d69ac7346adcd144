//! facematch-core: face comparison and demographic estimation.
//!
//! SCRFD finds faces, a dlib-compatible ResNet turns the first one into a
//! 128-d embedding, and two Caffe classifiers estimate gender and age. All
//! networks run on ONNX Runtime on the CPU.

pub mod alignment;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod encoder;
pub mod imaging;
pub mod processor;
pub mod recognizer;
pub mod types;

pub use classifier::{Classifier, ClassifierSlot, SlotState};
pub use config::ModelConfig;
pub use encoder::{FaceEncoder, OnnxFaceEncoder};
pub use imaging::BgrImage;
pub use processor::{FaceProcessor, ModelStatus, ProcessorError};
pub use types::{ComparisonResult, Embedding, FaceAnalysis, FaceLocation, Prediction};
