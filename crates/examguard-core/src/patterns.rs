//! Model-free registration heuristics.

use crate::types::{ApplicantData, EnrolledIdentity};
use chrono::{DateTime, Utc};
use std::fmt;

/// A registration closer than this to the previous one is suspicious.
pub const RAPID_WINDOW_SECS: i64 = 3600;

/// How many previous registrations the demographic check looks at.
pub const DEMOGRAPHIC_LOOKBACK: usize = 5;

/// Matching previous registrations needed to raise the demographic warning.
pub const DEMOGRAPHIC_MATCHES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternWarning {
    RapidSuccession,
    SimilarDemographics,
}

impl fmt::Display for PatternWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternWarning::RapidSuccession => f.write_str("Rapid successive registration detected"),
            PatternWarning::SimilarDemographics => {
                f.write_str("Multiple registrations with similar demographics")
            }
        }
    }
}

/// Check a new application against the registrations that preceded it.
///
/// `previous` is in registration order; only its tail matters.
pub fn check_registration_pattern(
    current: &ApplicantData,
    submitted_at: DateTime<Utc>,
    previous: &[EnrolledIdentity],
) -> Vec<PatternWarning> {
    let mut warnings = Vec::new();

    if let Some(last) = previous.last() {
        let elapsed = (submitted_at - last.timestamp).num_seconds();
        if elapsed < RAPID_WINDOW_SECS {
            warnings.push(PatternWarning::RapidSuccession);
        }
    }

    let recent = &previous[previous.len().saturating_sub(DEMOGRAPHIC_LOOKBACK)..];
    let similar = recent
        .iter()
        .filter(|prev| same_demographics(&prev.applicant, current))
        .count();
    if similar >= DEMOGRAPHIC_MATCHES {
        warnings.push(PatternWarning::SimilarDemographics);
    }

    warnings
}

/// Age must be present on both sides; location compares as-is.
fn same_demographics(a: &ApplicantData, b: &ApplicantData) -> bool {
    a.age.is_some() && a.age == b.age && a.location == b.location
}
