//! Detection + encoding seam.
//!
//! The quality gate, registry and verification flow only need "find faces"
//! and "encode this face". [`OnnxAnalyzer`] provides both with SCRFD and
//! ArcFace; tests substitute a scripted implementation.

use crate::detector::{DetectorError, FaceDetector};
use crate::frame::Frame;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("face encoding model not loaded")]
    EncoderUnavailable,
}

pub trait FaceAnalyzer: Send {
    /// Faces in `frame`, highest confidence first.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, AnalyzerError>;

    /// Encoding for one detected face.
    fn encode(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Embedding, AnalyzerError>;

    /// Whether [`encode`](Self::encode) can succeed at all.
    fn can_encode(&self) -> bool;
}

/// SCRFD detector plus an optional ArcFace recognizer.
///
/// Without the recognizer the quality and pose gates still work, but
/// registration and verification report the models as unavailable.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: Option<FaceRecognizer>,
}

impl OnnxAnalyzer {
    /// Load both models from `model_dir`.
    ///
    /// A missing detector is an error; a missing recognizer is logged and
    /// leaves the analyzer detection-only.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = match FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE)) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!(error = %e, "ArcFace unavailable; registration and verification disabled");
                None
            }
        };
        Ok(Self { detector, recognizer })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, AnalyzerError> {
        Ok(self.detector.detect(frame)?)
    }

    fn encode(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Embedding, AnalyzerError> {
        let recognizer = self.recognizer.as_mut().ok_or(AnalyzerError::EncoderUnavailable)?;
        Ok(recognizer.extract(frame, face)?)
    }

    fn can_encode(&self) -> bool {
        self.recognizer.is_some()
    }
}
