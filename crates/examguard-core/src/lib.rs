//! examguard-core: face matching and registration screening.
//!
//! SCRFD detection and ArcFace encoding run via ONNX Runtime. On top of
//! those sit the admissibility gate (pose + quality), the enrolled-face
//! registry, distance-threshold verification, and an isolation-forest anomaly scorer.

pub mod alignment;
pub mod analyzer;
pub mod anomaly;
pub mod detector;
pub mod forest;
pub mod frame;
pub mod patterns;
pub mod quality;
pub mod recognizer;
pub mod registry;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use anomaly::{AnomalyDetector, AnomalyRecord, AnomalyReport};
pub use frame::Frame;
pub use patterns::{check_registration_pattern, PatternWarning};
pub use quality::{PoseCheck, QualityReport};
pub use registry::{Analytics, FaceRegistry, RegistryError};
pub use types::{
    ApplicantData, BoundingBox, Embedding, EnrolledIdentity, MatchCandidate, Matcher, Metric,
    ThresholdMatcher, Verification,
};

/// Default verification threshold on [`Embedding::distance`].
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;
