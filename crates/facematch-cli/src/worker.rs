use facematch_core::{ComparisonResult, FaceAnalysis, FaceProcessor, ProcessorError};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("analysis failed: {0}")]
    Processor(#[from] ProcessorError),
    #[error("failed to start worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker thread exited")]
    ChannelClosed,
}

/// Messages sent from the front end to the worker thread.
enum WorkerRequest {
    Compare {
        image1: PathBuf,
        image2: PathBuf,
        reply: oneshot::Sender<ComparisonResult>,
    },
    Analyze {
        image: PathBuf,
        reply: oneshot::Sender<Result<FaceAnalysis, WorkerError>>,
    },
}

/// Clone-safe handle to the worker thread.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerRequest>,
}

impl WorkerHandle {
    /// Compare the first face in each image.
    pub async fn compare(&self, image1: PathBuf, image2: PathBuf) -> Result<ComparisonResult, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::Compare {
                image1,
                image2,
                reply: reply_tx,
            })
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WorkerError::ChannelClosed)
    }

    /// Analyze the first face in a single image.
    pub async fn analyze(&self, image: PathBuf) -> Result<FaceAnalysis, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::Analyze { image, reply: reply_tx })
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WorkerError::ChannelClosed)?
    }
}

/// Move `processor` onto a dedicated OS thread and serve requests one at a time.
pub fn spawn_worker(processor: FaceProcessor) -> Result<WorkerHandle, WorkerError> {
    let (tx, mut rx) = mpsc::channel::<WorkerRequest>(1);

    std::thread::Builder::new()
        .name("facematch-worker".into())
        .spawn(move || {
            tracing::debug!("worker thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    WorkerRequest::Compare { image1, image2, reply } => {
                        let _ = reply.send(processor.compare_faces(&image1, &image2));
                    }
                    WorkerRequest::Analyze { image, reply } => {
                        let result = processor.analyze_path(&image).map_err(WorkerError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::debug!("worker thread exiting");
        })?;

    Ok(WorkerHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facematch_core::encoder::EncoderError;
    use facematch_core::{ClassifierSlot, Embedding, FaceEncoder, FaceLocation};
    use image::{Rgb, RgbImage};

    /// One full-frame face per non-black image, embedded by its corner colour.
    /// A white image makes the encoder panic.
    struct CornerEncoder;

    impl FaceEncoder for CornerEncoder {
        fn face_locations(&self, image: &RgbImage) -> Result<Vec<FaceLocation>, EncoderError> {
            if image.get_pixel(0, 0).0 == [0, 0, 0] {
                return Ok(vec![]);
            }
            let (w, h) = (image.width() as i32, image.height() as i32);
            Ok(vec![FaceLocation { top: 0, right: w, bottom: h, left: 0 }])
        }

        fn face_encodings(&self, image: &RgbImage) -> Result<Vec<Embedding>, EncoderError> {
            let p = image.get_pixel(0, 0).0;
            if p == [0, 0, 0] {
                return Ok(vec![]);
            }
            if p == [255, 255, 255] {
                panic!("encoder exploded");
            }
            Ok(vec![Embedding::new(p.iter().map(|&c| c as f32 / 100.0).collect())])
        }
    }

    fn worker() -> WorkerHandle {
        let processor = FaceProcessor::new(
            Box::new(CornerEncoder),
            ClassifierSlot::Disabled,
            ClassifierSlot::Unavailable,
        );
        spawn_worker(processor).unwrap()
    }

    fn save(dir: &std::path::Path, name: &str, rgb: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(24, 24, Rgb(rgb)).save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn test_compare_through_worker() {
        let dir = tempfile::tempdir().unwrap();
        let a = save(dir.path(), "a.png", [40, 50, 60]);
        let b = save(dir.path(), "b.png", [40, 50, 140]);

        let handle = worker();
        let same = handle.compare(a.clone(), a.clone()).await.unwrap();
        assert!(same.is_same_person);
        assert_eq!(same.likelihood, 100.0);

        let different = handle.clone().compare(a, b).await.unwrap();
        assert!(!different.is_same_person);
        assert_eq!(different.message, "These images are not of the same person.");
    }

    #[tokio::test]
    async fn test_analyze_through_worker() {
        let dir = tempfile::tempdir().unwrap();
        let face = save(dir.path(), "face.png", [10, 20, 30]);
        let blank = save(dir.path(), "blank.png", [0, 0, 0]);

        let handle = worker();
        let a = handle.analyze(face).await.unwrap();
        assert!(a.face_detected);
        assert_eq!(a.gender, "Disabled");
        assert_eq!(a.age_bucket, "Unknown");

        assert!(!handle.analyze(blank).await.unwrap().face_detected);
        assert!(matches!(
            handle.analyze(dir.path().join("missing.png")).await,
            Err(WorkerError::Processor(ProcessorError::Image(_)))
        ));
    }

    #[tokio::test]
    async fn test_worker_survives_panicking_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let white = save(dir.path(), "white.png", [255, 255, 255]);
        let face = save(dir.path(), "face.png", [10, 20, 30]);

        let handle = worker();
        match handle.analyze(white).await {
            Err(WorkerError::Processor(ProcessorError::Panicked(msg))) => {
                assert_eq!(msg, "encoder exploded")
            }
            other => panic!("expected a contained panic, got {other:?}"),
        }
        assert!(handle.analyze(face).await.unwrap().face_detected);
    }
}
