//! facegate-core: face descriptors, matching, and extraction.
//!
//! Matching is an exhaustive Euclidean scan with an acceptance tolerance.
//! Extraction uses SCRFD for detection and ArcFace for embeddings, both on
//! ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use detector::{FaceBox, FaceDetector};
pub use extractor::{decode_image, ExtractError, FeatureExtractor, OnnxExtractor};
pub use matcher::{EuclideanMatcher, Match, MatchOutcome, Matcher, DEFAULT_TOLERANCE};
pub use recognizer::FaceRecognizer;
pub use types::{Candidate, Descriptor, DescriptorError, PersonRecord};

/// Default ONNX model directory: `$XDG_DATA_HOME/facegate/models`,
/// falling back to `~/.local/share/facegate/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate/models")
}
