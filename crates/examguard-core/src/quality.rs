//! Admissibility gate: pose (frontal enough) and image quality of the
//! primary face.
//!
//! Both checks are infallible from the caller's point of view. Detector
//! failures become a rejection (pose) or the neutral 0.5 score (quality).

use crate::analyzer::FaceAnalyzer;
use crate::frame::{self, Frame};
use crate::types::BoundingBox;
use serde::Serialize;
use std::path::Path;

/// Registrations scoring below this are rejected.
pub const MIN_REGISTRATION_QUALITY: f32 = 0.5;

/// Sub-scores below this add a feedback reason.
const SUBSCORE_FLOOR: f32 = 0.7;

/// Maximum |Δy/Δx| between eye centers.
const MAX_EYE_SLOPE: f32 = 0.3;

/// Accepted width/height range when no landmarks are available.
const ASPECT_RANGE: (f32, f32) = (0.7, 1.3);

const NEUTRAL_SCORE: f32 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    /// Unweighted mean of the three sub-scores.
    pub score: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub sharpness: f32,
    pub feedback: String,
}

impl QualityReport {
    fn fixed(score: f32, feedback: &str) -> Self {
        Self {
            score,
            brightness: 0.0,
            contrast: 0.0,
            sharpness: 0.0,
            feedback: feedback.to_string(),
        }
    }

    pub fn unreadable() -> Self {
        Self::fixed(0.0, "Unable to read image")
    }

    pub fn no_face() -> Self {
        Self::fixed(0.0, "No face detected")
    }

    pub fn failed() -> Self {
        Self::fixed(NEUTRAL_SCORE, "Quality assessment failed")
    }

    pub fn is_admissible(&self) -> bool {
        self.score >= MIN_REGISTRATION_QUALITY
    }
}

/// Score the region of `frame` covered by `face`.
pub fn score_face(frame: &Frame, face: &BoundingBox) -> QualityReport {
    let Some(region) = frame.crop(face) else {
        return QualityReport::no_face();
    };

    let brightness = (1.0 - (frame::mean(&region.data) - 127.0).abs() / 127.0) as f32;
    let contrast = (frame::stddev(&region.data) / 64.0).min(1.0) as f32;
    let sharpness =
        (frame::laplacian_variance(&region.data, region.width, region.height) / 1000.0).min(1.0) as f32;

    let mut feedback = Vec::new();
    if brightness < SUBSCORE_FLOOR {
        feedback.push("Poor lighting");
    }
    if contrast < SUBSCORE_FLOOR {
        feedback.push("Low contrast");
    }
    if sharpness < SUBSCORE_FLOOR {
        feedback.push("Blurry image");
    }

    QualityReport {
        score: (brightness + contrast + sharpness) / 3.0,
        brightness,
        contrast,
        sharpness,
        feedback: if feedback.is_empty() {
            "Good quality".to_string()
        } else {
            feedback.join(", ")
        },
    }
}

/// Detect the primary face and score it.
pub fn assess_quality(analyzer: &mut dyn FaceAnalyzer, frame: &Frame) -> QualityReport {
    match analyzer.detect(frame) {
        Ok(faces) => match faces.first() {
            Some(face) => score_face(frame, face),
            None => QualityReport::no_face(),
        },
        Err(e) => {
            tracing::warn!(error = %e, "quality assessment failed");
            QualityReport::failed()
        }
    }
}

/// [`assess_quality`] for an image on disk.
pub fn assess_quality_file(analyzer: &mut dyn FaceAnalyzer, path: &Path) -> QualityReport {
    match Frame::open(path) {
        Ok(frame) => assess_quality(analyzer, &frame),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "unreadable image");
            QualityReport::unreadable()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoseCheck {
    pub acceptable: bool,
    pub message: String,
}

impl PoseCheck {
    fn accept(message: &str) -> Self {
        Self { acceptable: true, message: message.to_string() }
    }

    fn reject(message: impl Into<String>) -> Self {
        Self { acceptable: false, message: message.into() }
    }
}

/// Pose decision for one detected face.
///
/// Uses the eye-line slope when landmarks exist, otherwise the coarse
/// bounding-box aspect check.
pub fn check_face_pose(face: &BoundingBox) -> PoseCheck {
    let Some(landmarks) = &face.landmarks else {
        if face.height <= 0.0 {
            return PoseCheck::reject("Unable to detect facial features properly");
        }
        let aspect = face.width / face.height;
        return if aspect < ASPECT_RANGE.0 || aspect > ASPECT_RANGE.1 {
            PoseCheck::reject("Face appears rotated. Please look directly at the camera.")
        } else {
            PoseCheck::accept("Face detected and appears frontal")
        };
    };

    let [left_eye, right_eye, nose, ..] = *landmarks;
    if [left_eye, right_eye, nose]
        .iter()
        .any(|(x, y)| !x.is_finite() || !y.is_finite())
    {
        return PoseCheck::reject("Unable to detect facial features properly");
    }

    let slope = ((left_eye.1 - right_eye.1) / (left_eye.0 - right_eye.0 + 1e-6)).abs();
    if slope > MAX_EYE_SLOPE {
        PoseCheck::reject("Face is not frontal. Please look directly at the camera.")
    } else {
        PoseCheck::accept("Pose is acceptable")
    }
}

/// Detect the primary face and check its pose.
pub fn validate_pose(analyzer: &mut dyn FaceAnalyzer, frame: &Frame) -> PoseCheck {
    match analyzer.detect(frame) {
        Ok(faces) => match faces.first() {
            Some(face) => check_face_pose(face),
            None => PoseCheck::reject("No face detected"),
        },
        Err(e) => PoseCheck::reject(format!("Error validating face: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerError;
    use crate::detector::DetectorError;
    use crate::types::Embedding;

    struct Scripted(Result<Vec<BoundingBox>, ()>);

    impl FaceAnalyzer for Scripted {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, AnalyzerError> {
            self.0
                .clone()
                .map_err(|_| DetectorError::InferenceFailed("scripted".into()).into())
        }

        fn encode(&mut self, _frame: &Frame, _face: &BoundingBox) -> Result<Embedding, AnalyzerError> {
            Err(AnalyzerError::EncoderUnavailable)
        }

        fn can_encode(&self) -> bool {
            false
        }
    }

    fn face(w: f32, h: f32, landmarks: Option<[(f32, f32); 5]>) -> BoundingBox {
        BoundingBox { x: 0.0, y: 0.0, width: w, height: h, confidence: 0.9, landmarks }
    }

    fn eyes(left: (f32, f32), right: (f32, f32)) -> Option<[(f32, f32); 5]> {
        Some([left, right, (50.0, 60.0), (40.0, 80.0), (60.0, 80.0)])
    }

    fn checkerboard(size: u32, lo: u8, hi: u8) -> Frame {
        let data = (0..size * size)
            .map(|i| if (i % size + i / size) % 2 == 0 { lo } else { hi })
            .collect();
        Frame::from_gray(data, size, size).unwrap()
    }

    #[test]
    fn test_level_eyes_accepted() {
        let check = check_face_pose(&face(100.0, 100.0, eyes((30.0, 40.0), (70.0, 42.0))));
        assert!(check.acceptable);
        assert_eq!(check.message, "Pose is acceptable");
    }

    #[test]
    fn test_tilted_eyes_rejected() {
        // slope 20/40 = 0.5
        let check = check_face_pose(&face(100.0, 100.0, eyes((30.0, 40.0), (70.0, 60.0))));
        assert!(!check.acceptable);
        assert!(check.message.starts_with("Face is not frontal"));
    }

    #[test]
    fn test_aspect_fallback() {
        assert!(check_face_pose(&face(100.0, 110.0, None)).acceptable);
        let wide = check_face_pose(&face(150.0, 100.0, None));
        assert!(!wide.acceptable);
        assert!(wide.message.starts_with("Face appears rotated"));
        assert!(!check_face_pose(&face(60.0, 100.0, None)).acceptable);
    }

    #[test]
    fn test_validate_pose_no_face() {
        let frame = checkerboard(8, 0, 255);
        let check = validate_pose(&mut Scripted(Ok(vec![])), &frame);
        assert!(!check.acceptable);
        assert_eq!(check.message, "No face detected");
    }

    #[test]
    fn test_validate_pose_detector_error() {
        let frame = checkerboard(8, 0, 255);
        let check = validate_pose(&mut Scripted(Err(())), &frame);
        assert!(!check.acceptable);
        assert!(check.message.starts_with("Error validating face"));
    }

    #[test]
    fn test_sharp_midtone_face_is_good_quality() {
        let frame = checkerboard(32, 0, 254);
        let report = score_face(&frame, &face(32.0, 32.0, None));
        assert!(report.brightness > 0.99, "brightness {}", report.brightness);
        assert_eq!(report.contrast, 1.0);
        assert_eq!(report.sharpness, 1.0);
        assert_eq!(report.feedback, "Good quality");
        assert!(report.is_admissible());
    }

    #[test]
    fn test_flat_dark_face_reports_all_reasons() {
        let frame = Frame::from_gray(vec![10; 32 * 32], 32, 32).unwrap();
        let report = score_face(&frame, &face(32.0, 32.0, None));
        assert_eq!(report.contrast, 0.0);
        assert_eq!(report.sharpness, 0.0);
        assert_eq!(report.feedback, "Poor lighting, Low contrast, Blurry image");
        assert!((report.score - report.brightness / 3.0).abs() < 1e-6);
        assert!(!report.is_admissible());
    }

    #[test]
    fn test_assess_quality_no_face_scores_zero() {
        let frame = checkerboard(8, 0, 255);
        let report = assess_quality(&mut Scripted(Ok(vec![])), &frame);
        assert_eq!(report.score, 0.0);
        assert_eq!(report.feedback, "No face detected");
    }

    #[test]
    fn test_assess_quality_detector_error_is_neutral() {
        let frame = checkerboard(8, 0, 255);
        let report = assess_quality(&mut Scripted(Err(())), &frame);
        assert_eq!(report.score, 0.5);
        assert_eq!(report.feedback, "Quality assessment failed");
    }

    #[test]
    fn test_unreadable_path_scores_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();

        let mut analyzer = Scripted(Ok(vec![face(8.0, 8.0, None)]));
        let report = assess_quality_file(&mut analyzer, &path);
        assert_eq!(report.score, 0.0);
        assert_eq!(report.feedback, "Unable to read image");

        let missing = assess_quality_file(&mut analyzer, &dir.path().join("missing.jpg"));
        assert_eq!(missing.feedback, "Unable to read image");
    }
}
