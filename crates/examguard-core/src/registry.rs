//! Enrolled-face registry persisted as a single JSON document.
//!
//! The file is rewritten wholesale after every successful registration via
//! a temporary sibling and a rename, so a reader never sees a partial write.

use crate::types::{ApplicantData, Embedding, EnrolledIdentity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Encodings at or below this distance from a stored one are the same person.
pub const DUPLICATE_TOLERANCE: f32 = 0.5;

const REGISTRY_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("registry file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported registry format version {0}")]
    UnsupportedVersion(u32),
    #[error("This face is already registered in the system")]
    AlreadyRegistered { distance: f32, existing: Uuid },
}

#[derive(Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    identities: Vec<EnrolledIdentity>,
}

/// Counts of registrations grouped by exam type and by location.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Analytics {
    pub total_registrations: usize,
    pub exams: BTreeMap<String, usize>,
    pub locations: BTreeMap<String, usize>,
}

pub struct FaceRegistry {
    path: PathBuf,
    identities: Vec<EnrolledIdentity>,
    tolerance: f32,
}

impl FaceRegistry {
    /// An empty registry that will persist to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            identities: Vec::new(),
            tolerance: DUPLICATE_TOLERANCE,
        }
    }

    /// Load the registry from `path`. A missing file is an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no registry file, starting empty");
                return Ok(Self::empty(path));
            }
            Err(source) => return Err(RegistryError::Io { path, source }),
        };

        let file: RegistryFile = match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(source) => return Err(RegistryError::Corrupt { path, source }),
        };
        if file.version != REGISTRY_FORMAT_VERSION {
            return Err(RegistryError::UnsupportedVersion(file.version));
        }

        tracing::info!(path = %path.display(), faces = file.identities.len(), "loaded registry");
        Ok(Self {
            path,
            identities: file.identities,
            tolerance: DUPLICATE_TOLERANCE,
        })
    }

    /// [`load`](Self::load), falling back to an empty registry on any error.
    ///
    /// The next successful registration overwrites the unreadable file.
    pub fn load_or_empty(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(path.clone()) {
            Ok(registry) => registry,
            Err(e) => {
                tracing::warn!(error = %e, "registry unreadable, starting empty");
                Self::empty(path)
            }
        }
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identities(&self) -> &[EnrolledIdentity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Closest stored identity to `encoding`, with its distance.
    pub fn nearest(&self, encoding: &Embedding) -> Option<(&EnrolledIdentity, f32)> {
        self.identities
            .iter()
            .map(|identity| (identity, encoding.distance(&identity.encoding)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Append a new identity unless it duplicates an existing one, then persist.
    ///
    /// On a persistence failure the append is undone.
    pub fn register(
        &mut self,
        encoding: Embedding,
        applicant: ApplicantData,
        timestamp: DateTime<Utc>,
    ) -> Result<&EnrolledIdentity, RegistryError> {
        if let Some((existing, distance)) = self.nearest(&encoding) {
            if distance <= self.tolerance {
                return Err(RegistryError::AlreadyRegistered {
                    distance,
                    existing: existing.id,
                });
            }
        }

        self.identities.push(EnrolledIdentity {
            id: Uuid::new_v4(),
            applicant,
            timestamp,
            encoding,
        });

        if let Err(e) = self.persist() {
            self.identities.pop();
            return Err(e);
        }

        let identity = &self.identities[self.identities.len() - 1];
        tracing::info!(
            id = %identity.id,
            application_id = %identity.applicant.application_id,
            total = self.identities.len(),
            "identity registered"
        );
        Ok(identity)
    }

    /// Write the whole registry to disk.
    pub fn persist(&self) -> Result<(), RegistryError> {
        let file = RegistryFile {
            version: REGISTRY_FORMAT_VERSION,
            identities: self.identities.clone(),
        };
        let bytes = serde_json::to_vec(&file).map_err(|source| RegistryError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &bytes).map_err(|source| RegistryError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), faces = self.identities.len(), "registry saved");
        Ok(())
    }

    pub fn analytics(&self) -> Analytics {
        let mut analytics = Analytics {
            total_registrations: self.identities.len(),
            ..Default::default()
        };
        for identity in &self.identities {
            *analytics.exams.entry(or_unknown(&identity.applicant.exam_type)).or_default() += 1;
            *analytics.locations.entry(or_unknown(&identity.applicant.location)).or_default() += 1;
        }
        analytics
    }
}

fn or_unknown(value: &str) -> String {
    if value.is_empty() {
        "Unknown".to_string()
    } else {
        value.to_string()
    }
}

/// Write `bytes` to `<path>.tmp`, then rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
