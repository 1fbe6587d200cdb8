//! Image → descriptor capability.
//!
//! The matcher and services only see [`FeatureExtractor`]; [`OnnxExtractor`]
//! is the production implementation (SCRFD detection + ArcFace embedding).

use crate::detector::{DetectorError, FaceBox, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Descriptor;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("payload is not a decodable image: {0}")]
    InvalidImage(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("extraction failed: {0}")]
    Failed(String),
}

impl From<DetectorError> for ExtractError {
    fn from(err: DetectorError) -> Self {
        ExtractError::Failed(err.to_string())
    }
}

impl From<RecognizerError> for ExtractError {
    fn from(err: RecognizerError) -> Self {
        ExtractError::Failed(err.to_string())
    }
}

/// Maps an encoded image to at most one face descriptor.
pub trait FeatureExtractor: Send {
    /// Descriptor length produced by [`extract`](Self::extract).
    fn dimension(&self) -> usize;

    /// Decode `image` and return the descriptor of its first detected face.
    fn extract(&mut self, image: &[u8]) -> Result<Descriptor, ExtractError>;
}

/// Decode an encoded image (JPEG, PNG, ...) into 8-bit RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::InvalidImage("empty payload".into()));
    }
    let img = image::load_from_memory(bytes).map_err(|e| ExtractError::InvalidImage(e.to_string()))?;
    Ok(img.to_rgb8())
}

/// SCRFD + ArcFace extractor.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxExtractor {
    /// Load both models. Fails fast if either file is missing or unloadable.
    pub fn load(scrfd_path: &str, arcface_path: &str) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self { detector, recognizer })
    }
}

impl FeatureExtractor for OnnxExtractor {
    fn dimension(&self) -> usize {
        crate::recognizer::ARCFACE_EMBEDDING_DIM
    }

    fn extract(&mut self, image: &[u8]) -> Result<Descriptor, ExtractError> {
        let rgb = decode_image(image)?;
        let faces = self.detector.detect(&rgb)?;

        let face = select_face(&faces)?;
        if faces.len() > 1 {
            tracing::debug!(count = faces.len(), "multiple faces detected; using the most confident");
        }

        let descriptor = self.recognizer.extract(&rgb, face)?;
        tracing::debug!(
            confidence = face.confidence,
            width = rgb.width(),
            height = rgb.height(),
            "descriptor extracted"
        );
        Ok(descriptor)
    }
}

/// Most confident face that can be aligned. `faces` is sorted by confidence.
fn select_face(faces: &[FaceBox]) -> Result<&FaceBox, ExtractError> {
    let face = faces
        .iter()
        .find(|f| f.landmarks.is_some())
        .ok_or(ExtractError::NoFaceDetected)?;
    if faces.first().is_some_and(|top| !std::ptr::eq(face, top)) {
        tracing::debug!(confidence = face.confidence, "top detection had no landmarks; using next face");
    }
    Ok(face)
}
