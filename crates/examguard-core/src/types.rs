use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

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

/// Model version tag the ArcFace recognizer stamps on its encodings.
pub const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Wrap raw values with no model version attached.
    pub fn from_values(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    /// Distance used for duplicate rejection and verification, in the
    /// metric [`Metric::for_pair`] picks for the two encodings.
    pub fn distance(&self, other: &Embedding) -> f32 {
        Metric::for_pair(self, other).distance(&self.values, &other.values)
    }

    fn is_arcface(&self) -> bool {
        self.model_version.as_deref() == Some(ARCFACE_MODEL_VERSION)
    }
}

/// How two encodings are compared.
///
/// The match threshold (0.6) and duplicate tolerance (0.5) are distances on
/// a scale where identical faces sit at 0 and unrelated ones near 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Plain Euclidean distance; used when the producing model is unknown.
    Euclidean,
    /// `1 - cos`, for unit-length ArcFace encodings. A distance of 0.6 is
    /// cosine 0.4, the usual w600k_r50 acceptance point; 0.5 is cosine 0.5.
    Cosine,
}

impl Metric {
    /// Cosine when both encodings come from ArcFace, Euclidean otherwise.
    pub fn for_pair(a: &Embedding, b: &Embedding) -> Self {
        if a.is_arcface() && b.is_arcface() {
            Metric::Cosine
        } else {
            Metric::Euclidean
        }
    }

    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f32>()
                .sqrt(),
            Metric::Cosine => {
                let mut dot = 0.0f32;
                let mut norm_a = 0.0f32;
                let mut norm_b = 0.0f32;
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    norm_a += x * x;
                    norm_b += y * y;
                }
                let denom = norm_a.sqrt() * norm_b.sqrt();
                let cos = if denom > 0.0 { dot / denom } else { 0.0 };
                1.0 - cos
            }
        }
    }
}

/// Application record submitted alongside a face image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicantData {
    pub application_id: String,
    pub full_name: String,
    pub age: Option<u32>,
    pub exam_type: String,
    pub location: String,
}

/// An enrolled identity: applicant record plus the encoding that passed
/// the uniqueness check at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub id: Uuid,
    #[serde(flatten)]
    pub applicant: ApplicantData,
    pub timestamp: DateTime<Utc>,
    pub encoding: Embedding,
}

/// One registry entry within the verification threshold of a query.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub identity_id: Uuid,
    pub user_data: ApplicantData,
    pub registered_at: DateTime<Utc>,
    /// `1 - distance`; negative for very dissimilar pairs.
    pub confidence: f32,
    pub distance: f32,
}

/// Result of ranking a query embedding against the registry.
#[derive(Debug, Clone)]
pub struct Verification {
    pub verified: bool,
    /// Smallest distance seen across the whole gallery (None when empty).
    pub best_distance: Option<f32>,
    /// Entries with distance <= threshold, sorted by descending confidence.
    pub candidates: Vec<MatchCandidate>,
}

/// Strategy for comparing a query embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn rank(&self, query: &Embedding, gallery: &[EnrolledIdentity], threshold: f32) -> Verification;
}

/// Distance-threshold matcher over [`Embedding::distance`].
///
/// Always iterates every gallery entry; ties in confidence keep registry order.
pub struct ThresholdMatcher;

impl Matcher for ThresholdMatcher {
    fn rank(&self, query: &Embedding, gallery: &[EnrolledIdentity], threshold: f32) -> Verification {
        let mut best_distance: Option<f32> = None;
        let mut candidates = Vec::new();

        for identity in gallery {
            let distance = query.distance(&identity.encoding);
            if best_distance.map_or(true, |best| distance < best) {
                best_distance = Some(distance);
            }
            if distance <= threshold {
                candidates.push(MatchCandidate {
                    identity_id: identity.id,
                    user_data: identity.applicant.clone(),
                    registered_at: identity.timestamp,
                    confidence: 1.0 - distance,
                    distance,
                });
            }
        }

        // sort_by is stable, so equal confidences stay in registry order
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Verification {
            verified: best_distance.is_some_and(|d| d <= threshold),
            best_distance,
            candidates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, values: Vec<f32>) -> EnrolledIdentity {
        EnrolledIdentity {
            id: Uuid::new_v4(),
            applicant: ApplicantData {
                full_name: name.into(),
                ..Default::default()
            },
            timestamp: Utc::now(),
            encoding: Embedding::from_values(values),
        }
    }

    #[test]
    fn test_distance_identical_is_zero() {
        let a = Embedding::from_values(vec![0.3, -0.2, 0.9]);
        assert_eq!(a.distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_distance_3_4_5() {
        let a = Embedding::from_values(vec![0.0, 0.0]);
        let b = Embedding::from_values(vec![3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_rank_exact_query_verifies() {
        let gallery = vec![
            identity("decoy", vec![0.0, 1.0, 0.0]),
            identity("match", vec![1.0, 0.0, 0.0]),
        ];
        let query = Embedding::from_values(vec![1.0, 0.0, 0.0]);

        let result = ThresholdMatcher.rank(&query, &gallery, 0.6);
        assert!(result.verified);
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].user_data.full_name, "match");
        assert!(result.candidates[0].distance.abs() < 1e-6);
        assert!((result.candidates[0].confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rank_sorted_and_confidence_exact() {
        let gallery = vec![
            identity("far", vec![0.5, 0.0]),
            identity("near", vec![0.1, 0.0]),
            identity("mid", vec![0.3, 0.0]),
        ];
        let query = Embedding::from_values(vec![0.0, 0.0]);

        let result = ThresholdMatcher.rank(&query, &gallery, 0.6);
        let names: Vec<_> = result.candidates.iter().map(|c| c.user_data.full_name.as_str()).collect();
        assert_eq!(names, ["near", "mid", "far"]);
        for c in &result.candidates {
            assert_eq!(c.confidence, 1.0 - c.distance);
        }
        assert!(result
            .candidates
            .windows(2)
            .all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn test_rank_ties_keep_registry_order() {
        let gallery = vec![
            identity("first", vec![0.2, 0.0]),
            identity("second", vec![0.0, 0.2]),
        ];
        let query = Embedding::from_values(vec![0.0, 0.0]);

        let result = ThresholdMatcher.rank(&query, &gallery, 0.6);
        assert_eq!(result.candidates[0].user_data.full_name, "first");
        assert_eq!(result.candidates[1].user_data.full_name, "second");
    }

    #[test]
    fn test_rank_beyond_threshold_rejects() {
        let gallery = vec![identity("other", vec![2.0, 0.0])];
        let query = Embedding::from_values(vec![0.0, 0.0]);

        let result = ThresholdMatcher.rank(&query, &gallery, 0.6);
        assert!(!result.verified);
        assert!(result.candidates.is_empty());
        assert!((result.best_distance.unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_can_be_negative() {
        let gallery = vec![identity("far", vec![1.5, 0.0])];
        let query = Embedding::from_values(vec![0.0, 0.0]);

        let result = ThresholdMatcher.rank(&query, &gallery, 2.0);
        assert!(result.verified);
        assert!((result.candidates[0].confidence + 0.5).abs() < 1e-6);
    }

    /// Unit vector at cosine `cos` from the first axis, tagged as ArcFace output.
    fn arcface_at(cos: f32) -> Embedding {
        let mut values = vec![0.0f32; 512];
        values[0] = cos;
        values[1] = (1.0 - cos * cos).sqrt();
        Embedding {
            values,
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        }
    }

    fn arcface_identity(name: &str, cos: f32) -> EnrolledIdentity {
        EnrolledIdentity {
            encoding: arcface_at(cos),
            ..identity(name, Vec::new())
        }
    }

    #[test]
    fn test_arcface_pairs_use_cosine_distance() {
        let a = arcface_at(1.0);
        let b = arcface_at(0.6);
        assert_eq!(Metric::for_pair(&a, &b), Metric::Cosine);
        assert!((a.distance(&b) - 0.4).abs() < 1e-5);

        let untagged = Embedding::from_values(b.values.clone());
        assert_eq!(Metric::for_pair(&a, &untagged), Metric::Euclidean);
        assert!((a.distance(&untagged) - 0.8f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_same_person_arcface_similarity_verifies() {
        let gallery = vec![arcface_identity("enrolled", 1.0)];
        for cos in [0.5f32, 0.6, 0.7] {
            let result = ThresholdMatcher.rank(&arcface_at(cos), &gallery, 0.6);
            assert!(result.verified, "cos {cos} should verify");
            let c = &result.candidates[0];
            assert!((c.confidence - cos).abs() < 1e-5);
            assert_eq!(c.confidence, 1.0 - c.distance);
        }
    }

    #[test]
    fn test_unrelated_arcface_face_rejected() {
        let gallery = vec![arcface_identity("enrolled", 1.0)];
        let result = ThresholdMatcher.rank(&arcface_at(0.2), &gallery, 0.6);
        assert!(!result.verified);
        assert!(result.candidates.is_empty());
        assert!((result.best_distance.unwrap() - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_zero_vector_is_maximally_distant_under_cosine() {
        let mut zero = arcface_at(1.0);
        zero.values.iter_mut().for_each(|v| *v = 0.0);
        assert_eq!(zero.distance(&arcface_at(1.0)), 1.0);
    }

    #[test]
    fn test_rank_empty_gallery() {
        let query = Embedding::from_values(vec![1.0, 0.0]);
        let result = ThresholdMatcher.rank(&query, &[], 0.6);
        assert!(!result.verified);
        assert!(result.best_distance.is_none());
        assert!(result.candidates.is_empty());
    }
}
