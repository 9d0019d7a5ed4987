use chrono::{DateTime, Utc};
use examguard_core::quality::{self, QualityReport};
use examguard_core::{
    check_registration_pattern, Analytics, AnomalyDetector, AnomalyRecord, ApplicantData,
    FaceAnalyzer, FaceRegistry, Frame, MatchCandidate, Matcher, RegistryError, ThresholdMatcher,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

const MODELS_UNAVAILABLE: &str =
    "Face recognition models not available. Place det_10g.onnx and w600k_r50.onnx in the model directory.";
const NO_FACE: &str = "No face detected in the image";
const MULTIPLE_FACES: &str = "Multiple faces detected. Please upload an image with only one face.";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Why a registration was refused. The display text is user-facing.
#[derive(Error, Debug)]
pub enum Rejection {
    #[error("{}", MODELS_UNAVAILABLE)]
    Unavailable,
    #[error("{}", NO_FACE)]
    NoFace,
    #[error("{}", MULTIPLE_FACES)]
    MultipleFaces,
    #[error("{0}")]
    Pose(String),
    #[error("Poor image quality: {feedback}. Please upload a clearer image.")]
    Quality { score: f32, feedback: String },
    #[error("This face is already registered in the system")]
    Duplicate,
    #[error("Error during face registration: {0}")]
    Internal(String),
}

/// Successful registration.
#[derive(Debug, Clone, Serialize)]
pub struct Registered {
    pub identity_id: Uuid,
    pub message: String,
    pub quality_score: f32,
    /// Pattern heuristics raised against earlier registrations; informational.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub verified: bool,
    pub matches: Vec<MatchCandidate>,
    pub message: String,
    pub quality: QualityReport,
}

/// Pattern warnings one enrolment would have raised when it was registered.
#[derive(Debug, Clone, Serialize)]
pub struct PatternFlags {
    pub identity_id: Uuid,
    pub application_id: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyOverview {
    pub anomalies: Vec<AnomalyRecord>,
    pub message: String,
    /// One entry per flagged enrolment, in registration order.
    pub pattern_warnings: Vec<PatternFlags>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub face_recognition_available: bool,
    pub registered_faces: usize,
    pub database_path: String,
}

/// Thresholds the engine applies to every request.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub match_threshold: f32,
    pub anomaly_threshold: f64,
    pub min_quality: f32,
}

/// Owns every piece of mutable state: the analyzer, registry and anomaly model.
pub struct Engine {
    analyzer: Option<Box<dyn FaceAnalyzer>>,
    registry: FaceRegistry,
    anomaly: AnomalyDetector,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        analyzer: Option<Box<dyn FaceAnalyzer>>,
        registry: FaceRegistry,
        anomaly: AnomalyDetector,
        settings: EngineSettings,
    ) -> Self {
        Self { analyzer, registry, anomaly, settings }
    }

    /// Pose gate, quality gate, duplicate check, then append to the registry.
    pub fn register(
        &mut self,
        frame: &Frame,
        applicant: ApplicantData,
        now: DateTime<Utc>,
    ) -> Result<Registered, Rejection> {
        let analyzer = self.analyzer.as_deref_mut().ok_or(Rejection::Unavailable)?;

        let faces = analyzer
            .detect(frame)
            .map_err(|e| Rejection::Pose(format!("Error validating face: {e}")))?;
        let face = faces.first().ok_or(Rejection::NoFace)?;

        let pose = quality::check_face_pose(face);
        if !pose.acceptable {
            tracing::debug!(reason = %pose.message, "register: pose rejected");
            return Err(Rejection::Pose(pose.message));
        }

        let report = quality::score_face(frame, face);
        if report.score < self.settings.min_quality {
            tracing::debug!(score = report.score, feedback = %report.feedback, "register: quality rejected");
            return Err(Rejection::Quality {
                score: report.score,
                feedback: report.feedback,
            });
        }

        if faces.len() > 1 {
            return Err(Rejection::MultipleFaces);
        }
        if !analyzer.can_encode() {
            return Err(Rejection::Unavailable);
        }

        let encoding = analyzer
            .encode(frame, face)
            .map_err(|e| Rejection::Internal(e.to_string()))?;

        let warnings: Vec<String> =
            check_registration_pattern(&applicant, now, self.registry.identities())
                .iter()
                .map(ToString::to_string)
                .collect();

        let identity = self
            .registry
            .register(encoding, applicant, now)
            .map_err(|e| match e {
                RegistryError::AlreadyRegistered { distance, existing } => {
                    tracing::info!(distance, %existing, "register: duplicate face");
                    Rejection::Duplicate
                }
                other => Rejection::Internal(other.to_string()),
            })?;

        if !warnings.is_empty() {
            tracing::warn!(
                id = %identity.id,
                application_id = %identity.applicant.application_id,
                ?warnings,
                "suspicious registration pattern"
            );
        }

        Ok(Registered {
            identity_id: identity.id,
            message: format!("Registration successful! Quality score: {:.2}", report.score),
            quality_score: report.score,
            warnings,
        })
    }

    /// Rank the query face against the registry. Never fails; problems are
    /// reported through the message.
    pub fn verify(&mut self, frame: &Frame, threshold: Option<f32>) -> VerificationOutcome {
        let threshold = threshold.unwrap_or(self.settings.match_threshold);
        let Some(analyzer) = self.analyzer.as_deref_mut() else {
            return VerificationOutcome::rejected(MODELS_UNAVAILABLE, QualityReport::failed());
        };

        let faces = match analyzer.detect(frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "verify: detection failed");
                return VerificationOutcome::rejected(
                    format!("Error during face verification: {e}"),
                    QualityReport::failed(),
                );
            }
        };
        let Some(face) = faces.first() else {
            return VerificationOutcome::rejected(NO_FACE, QualityReport::no_face());
        };
        let report = quality::score_face(frame, face);

        if !analyzer.can_encode() {
            return VerificationOutcome::rejected(MODELS_UNAVAILABLE, report);
        }
        if faces.len() > 1 {
            return VerificationOutcome::rejected(MULTIPLE_FACES, report);
        }
        if self.registry.is_empty() {
            return VerificationOutcome::rejected("No registered faces in the system", report);
        }

        let query = match analyzer.encode(frame, face) {
            Ok(query) => query,
            Err(e) => {
                return VerificationOutcome::rejected(format!("Error during face verification: {e}"), report)
            }
        };

        let result = ThresholdMatcher.rank(&query, self.registry.identities(), threshold);
        let best = result.best_distance.unwrap_or(f32::INFINITY);
        let message = if result.verified {
            format!("Face verified with confidence: {:.2}", 1.0 - best)
        } else {
            format!("No match found. Best distance: {best:.2}")
        };
        tracing::info!(
            verified = result.verified,
            best_distance = best,
            matches = result.candidates.len(),
            "verify complete"
        );

        VerificationOutcome {
            verified: result.verified,
            matches: result.candidates,
            message,
            quality: report,
        }
    }

    pub fn analytics(&self) -> Analytics {
        self.registry.analytics()
    }

    /// Score the whole registry as one batch and replay the pattern checks.
    pub fn anomalies(&mut self) -> AnomalyOverview {
        let identities = self.registry.identities();
        let report = self.anomaly.detect(
            identities.iter().map(|i| (&i.encoding, &i.applicant)),
            self.settings.anomaly_threshold,
        );

        let pattern_warnings = identities
            .iter()
            .enumerate()
            .filter_map(|(i, identity)| {
                let warnings =
                    check_registration_pattern(&identity.applicant, identity.timestamp, &identities[..i]);
                (!warnings.is_empty()).then(|| PatternFlags {
                    identity_id: identity.id,
                    application_id: identity.applicant.application_id.clone(),
                    warnings: warnings.iter().map(ToString::to_string).collect(),
                })
            })
            .collect();

        AnomalyOverview {
            anomalies: report.anomalies,
            message: report.message,
            pattern_warnings,
        }
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            face_recognition_available: self.analyzer.as_ref().is_some_and(|a| a.can_encode()),
            registered_faces: self.registry.len(),
            database_path: self.registry.path().display().to_string(),
        }
    }
}

impl VerificationOutcome {
    fn rejected(message: impl Into<String>, quality: QualityReport) -> Self {
        Self {
            verified: false,
            matches: Vec::new(),
            message: message.into(),
            quality,
        }
    }
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Register {
        frame: Frame,
        applicant: ApplicantData,
        reply: oneshot::Sender<Result<Registered, Rejection>>,
    },
    Verify {
        frame: Frame,
        reply: oneshot::Sender<VerificationOutcome>,
    },
    Analytics {
        reply: oneshot::Sender<Analytics>,
    },
    Anomalies {
        reply: oneshot::Sender<AnomalyOverview>,
    },
    Status {
        reply: oneshot::Sender<SystemStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn register(
        &self,
        frame: Frame,
        applicant: ApplicantData,
    ) -> Result<Result<Registered, Rejection>, EngineError> {
        self.call(|reply| EngineRequest::Register { frame, applicant, reply }).await
    }

    pub async fn verify(&self, frame: Frame) -> Result<VerificationOutcome, EngineError> {
        self.call(|reply| EngineRequest::Verify { frame, reply }).await
    }

    pub async fn analytics(&self) -> Result<Analytics, EngineError> {
        self.call(|reply| EngineRequest::Analytics { reply }).await
    }

    pub async fn anomalies(&self) -> Result<AnomalyOverview, EngineError> {
        self.call(|reply| EngineRequest::Anomalies { reply }).await
    }

    pub async fn status(&self) -> Result<SystemStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }
}

/// Move the engine onto a dedicated OS thread and return a handle to it.
///
/// Requests are served one at a time, so registry writes and the first
/// anomaly-model fit never overlap.
pub fn spawn_engine(mut engine: Engine) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("examguard-engine".into())
        .spawn(move || {
            tracing::info!(faces = engine.registry.len(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register { frame, applicant, reply } => {
                        let _ = reply.send(engine.register(&frame, applicant, Utc::now()));
                    }
                    EngineRequest::Verify { frame, reply } => {
                        let _ = reply.send(engine.verify(&frame, None));
                    }
                    EngineRequest::Analytics { reply } => {
                        let _ = reply.send(engine.analytics());
                    }
                    EngineRequest::Anomalies { reply } => {
                        let _ = reply.send(engine.anomalies());
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(engine.status());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
