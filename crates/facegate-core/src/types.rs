use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size in bytes of one encoded descriptor component (little-endian `f32`).
const COMPONENT_BYTES: usize = std::mem::size_of::<f32>();

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("descriptor is empty")]
    Empty,
    #[error("descriptor blob length {0} is not a multiple of 4")]
    Truncated(usize),
    #[error("descriptor component {index} is not finite")]
    NonFinite { index: usize },
    #[error("descriptor stored as {0}, expected a blob")]
    NotBlob(&'static str),
}

/// Face descriptor vector (512-dimensional for ArcFace w600k_r50).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of dimensions.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean (L2) distance. 0 = identical, larger = less similar.
    ///
    /// Only the overlapping prefix is compared; callers check lengths first.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Scale to unit L2 norm. A zero vector is returned unchanged.
    pub fn l2_normalized(mut self) -> Self {
        let norm = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            self.values.iter_mut().for_each(|x| *x /= norm);
        }
        self
    }

    /// First index holding NaN or ±inf, if any.
    pub fn first_non_finite(&self) -> Option<usize> {
        self.values.iter().position(|v| !v.is_finite())
    }

    /// Encode as a packed little-endian `f32` blob (4 bytes per component).
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Decode a blob produced by [`to_le_bytes`](Self::to_le_bytes).
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.is_empty() {
            return Err(DescriptorError::Empty);
        }
        if bytes.len() % COMPONENT_BYTES != 0 {
            return Err(DescriptorError::Truncated(bytes.len()));
        }

        let values: Vec<f32> = bytes
            .chunks_exact(COMPONENT_BYTES)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let descriptor = Self { values };
        match descriptor.first_non_finite() {
            Some(index) => Err(DescriptorError::NonFinite { index }),
            None => Ok(descriptor),
        }
    }
}

/// A registered person, keyed externally by `identifier`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonRecord {
    /// Store-assigned surrogate key; stable across re-registration.
    pub id: String,
    pub identifier: String,
    pub display_name: String,
    pub descriptor: Descriptor,
    pub created_at: String,
    pub updated_at: String,
}

/// A stored row as seen by the matcher.
///
/// The descriptor is kept as a decode result so that one corrupt row is
/// skipped during a scan instead of failing it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub identifier: String,
    pub display_name: String,
    pub descriptor: Result<Descriptor, DescriptorError>,
}

impl Candidate {
    pub fn new(identifier: impl Into<String>, display_name: impl Into<String>, descriptor: Descriptor) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            descriptor: Ok(descriptor),
        }
    }
}

impl From<PersonRecord> for Candidate {
    fn from(record: PersonRecord) -> Self {
        Self {
            identifier: record.identifier,
            display_name: record.display_name,
            descriptor: Ok(record.descriptor),
        }
    }
}
