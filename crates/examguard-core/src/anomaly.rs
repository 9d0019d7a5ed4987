//! Isolation-forest scoring over registration batches.
//!
//! The scaler and forest are fit once, on the first batch that has at least
//! [`MIN_SAMPLES`] entries, then persisted and reused for every later batch.

use crate::forest::{ForestParams, IsolationForest, StandardScaler};
use crate::registry::write_atomic;
use crate::types::{ApplicantData, Embedding};
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Batches smaller than this are not scored.
pub const MIN_SAMPLES: usize = 10;

pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 0.8;

const ENCODING_FEATURES: usize = 10;
const DEFAULT_AGE: f64 = 30.0;

#[derive(Error, Debug)]
pub enum AnomalyError {
    #[error("anomaly model I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("anomaly model file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRecord {
    pub index: usize,
    pub user_data: ApplicantData,
    pub anomaly_score: f64,
    pub is_anomaly: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    pub anomalies: Vec<AnomalyRecord>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FittedModel {
    scaler: StandardScaler,
    forest: IsolationForest,
}

#[derive(Serialize, Deserialize)]
struct ModelFile {
    is_fitted: bool,
    model: Option<FittedModel>,
}

/// 10 leading encoding components (zero-padded), age, hour of day.
pub fn extract_features(encoding: &Embedding, applicant: &ApplicantData, hour: u32) -> Vec<f64> {
    let mut features: Vec<f64> = (0..ENCODING_FEATURES)
        .map(|i| encoding.values.get(i).copied().unwrap_or(0.0) as f64)
        .collect();
    features.push(applicant.age.map_or(DEFAULT_AGE, f64::from));
    features.push(hour as f64);
    features
}

pub struct AnomalyDetector {
    path: PathBuf,
    params: ForestParams,
    model: Option<FittedModel>,
}

impl AnomalyDetector {
    pub fn unfit(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            params: ForestParams::default(),
            model: None,
        }
    }

    /// Load persisted model state. A missing file yields an unfit detector.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, AnomalyError> {
        let path = path.into();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::unfit(path)),
            Err(source) => return Err(AnomalyError::Io { path, source }),
        };
        let file: ModelFile = match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(source) => return Err(AnomalyError::Corrupt { path, source }),
        };

        let model = file.model.filter(|_| file.is_fitted);
        if let Some(fitted) = &model {
            let params = fitted.forest.params();
            tracing::debug!(trees = params.n_trees, contamination = params.contamination, "persisted forest");
        }
        tracing::info!(path = %path.display(), fitted = model.is_some(), "loaded anomaly model");
        Ok(Self {
            path,
            params: ForestParams::default(),
            model,
        })
    }

    /// [`load`](Self::load), starting unfit if the file cannot be used.
    pub fn load_or_unfit(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(path.clone()) {
            Ok(detector) => detector,
            Err(e) => {
                tracing::warn!(error = %e, "anomaly model unreadable, starting unfit");
                Self::unfit(path)
            }
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Score a batch using the current local hour.
    ///
    /// The hour feature reflects when the batch is scored, not when each
    /// sample was registered, so the same stored sample can score
    /// differently at different times of day.
    pub fn detect<'a>(
        &mut self,
        samples: impl IntoIterator<Item = (&'a Embedding, &'a ApplicantData)>,
        threshold: f64,
    ) -> AnomalyReport {
        let hour = chrono::Local::now().hour();
        self.detect_at_hour(samples, threshold, hour)
    }

    pub fn detect_at_hour<'a>(
        &mut self,
        samples: impl IntoIterator<Item = (&'a Embedding, &'a ApplicantData)>,
        threshold: f64,
        hour: u32,
    ) -> AnomalyReport {
        let samples: Vec<_> = samples.into_iter().collect();
        if samples.len() < MIN_SAMPLES {
            return AnomalyReport {
                anomalies: Vec::new(),
                message: "Insufficient data for anomaly detection".to_string(),
            };
        }

        let features: Vec<Vec<f64>> = samples
            .iter()
            .map(|(encoding, applicant)| extract_features(encoding, applicant, hour))
            .collect();

        if self.model.is_none() {
            self.fit(&features);
        }
        let Some(model) = &self.model else {
            return AnomalyReport {
                anomalies: Vec::new(),
                message: "Anomaly model unavailable".to_string(),
            };
        };

        let anomalies: Vec<AnomalyRecord> = features
            .iter()
            .enumerate()
            .filter_map(|(index, raw)| {
                let scaled = model.scaler.transform(raw);
                let score = model.forest.decision_function(&scaled);
                let flagged = model.forest.is_outlier(&scaled) || score < -threshold;
                flagged.then(|| AnomalyRecord {
                    index,
                    user_data: samples[index].1.clone(),
                    anomaly_score: score,
                    is_anomaly: true,
                })
            })
            .collect();

        tracing::info!(
            samples = samples.len(),
            flagged = anomalies.len(),
            hour,
            "anomaly batch scored"
        );
        AnomalyReport {
            message: format!("Found {} potential anomalies", anomalies.len()),
            anomalies,
        }
    }

    fn fit(&mut self, features: &[Vec<f64>]) {
        let scaler = StandardScaler::fit(features);
        let scaled: Vec<Vec<f64>> = features.iter().map(|f| scaler.transform(f)).collect();
        let forest = IsolationForest::fit(&scaled, self.params);
        self.model = Some(FittedModel { scaler, forest });
        tracing::info!(samples = features.len(), "anomaly model fitted");

        // A failed save keeps the in-memory fit; the next process start refits.
        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "failed to persist anomaly model");
        }
    }

    fn save(&self) -> Result<(), AnomalyError> {
        let file = ModelFile {
            is_fitted: self.model.is_some(),
            model: self.model.clone(),
        };
        let bytes = serde_json::to_vec(&file).map_err(|source| AnomalyError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &bytes).map_err(|source| AnomalyError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
