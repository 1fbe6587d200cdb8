//! Registration and recognition orchestration.
//!
//! Both services share the extraction engine and the descriptor store; they
//! hold no state of their own between requests.

use crate::engine::{EngineError, EngineHandle};
use facegate_core::{EuclideanMatcher, MatchOutcome, Matcher};
use facegate_store::{DescriptorStore, StoreError, UpsertOutcome};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Identifier/name reported when nobody matched.
pub const UNKNOWN: &str = "UNKNOWN";

const MAX_IDENTIFIER_LEN: usize = 20;
const MAX_NAME_LEN: usize = 255;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("image could not be decoded: {0}")]
    InvalidImage(String),
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("face extraction timed out")]
    ExtractionTimeout,
    #[error("face extractor unavailable: {0}")]
    ExtractorUnavailable(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl ServiceError {
    /// Infrastructure faults the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::ExtractionTimeout | ServiceError::ExtractorUnavailable(_) | ServiceError::StorageUnavailable(_)
        )
    }
}

impl From<EngineError> for ServiceError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidImage(msg) => ServiceError::InvalidImage(msg),
            EngineError::NoFaceDetected => ServiceError::NoFaceDetected,
            EngineError::Timeout(_) => ServiceError::ExtractionTimeout,
            other @ (EngineError::Extractor(_) | EngineError::Spawn(_) | EngineError::ChannelClosed) => {
                ServiceError::ExtractorUnavailable(other.to_string())
            }
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        ServiceError::StorageUnavailable(err.to_string())
    }
}

/// Run a store call on the blocking pool.
///
/// The closure runs to completion even if the awaiting request is dropped,
/// so a started upsert either commits fully or not at all.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServiceError::StorageUnavailable(format!("store task failed: {e}")))?
        .map_err(ServiceError::from)
}

pub struct RegisterRequest {
    pub image: Vec<u8>,
    pub name: String,
    pub identifier: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Created,
    Updated,
}

impl From<UpsertOutcome> for RegistrationStatus {
    fn from(outcome: UpsertOutcome) -> Self {
        match outcome {
            UpsertOutcome::Created => RegistrationStatus::Created,
            UpsertOutcome::Updated => RegistrationStatus::Updated,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub status: RegistrationStatus,
    pub id: String,
    pub identifier: String,
    pub name: String,
}

/// Recognition result. `Unknown` is a successful, negative outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    Recognized {
        identifier: String,
        name: String,
        /// 0–1, `1 - distance` clamped.
        confidence: f32,
        distance: f32,
    },
    Unknown,
}

impl Recognition {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Recognition::Recognized { identifier, name, confidence, distance } => serde_json::json!({
                "status": "recognized",
                "identifier": identifier,
                "name": name,
                "confidence": confidence,
                "distance": distance,
            }),
            Recognition::Unknown => serde_json::json!({
                "status": "unknown",
                "identifier": UNKNOWN,
                "name": UNKNOWN,
                "confidence": 0.0,
            }),
        }
    }
}

fn required(field: &str, value: &str, max_len: usize) -> Result<String, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Validation(format!("missing field: {field}")));
    }
    if trimmed.chars().count() > max_len {
        return Err(ServiceError::Validation(format!("{field} exceeds {max_len} characters")));
    }
    Ok(trimmed.to_string())
}

fn require_image(image: &[u8]) -> Result<(), ServiceError> {
    if image.is_empty() {
        return Err(ServiceError::Validation("missing field: image".into()));
    }
    Ok(())
}

pub struct RegistrationService {
    engine: EngineHandle,
    store: Arc<dyn DescriptorStore>,
}

impl RegistrationService {
    pub fn new(engine: EngineHandle, store: Arc<dyn DescriptorStore>) -> Self {
        Self { engine, store }
    }

    /// Extract the face descriptor and upsert it under `identifier`.
    pub async fn register(&self, request: RegisterRequest) -> Result<Registration, ServiceError> {
        let RegisterRequest { image, name, identifier } = request;
        require_image(&image)?;
        let name = required("name", &name, MAX_NAME_LEN)?;
        let identifier = required("identifier", &identifier, MAX_IDENTIFIER_LEN)?;

        let descriptor = self.engine.extract(image).await.map_err(|err| {
            tracing::info!(%identifier, error = %err, "registration extraction failed");
            ServiceError::from(err)
        })?;

        let store = Arc::clone(&self.store);
        let upserted = run_blocking(move || store.upsert(&identifier, &name, &descriptor)).await?;

        let status = RegistrationStatus::from(upserted.outcome);
        tracing::info!(
            identifier = %upserted.record.identifier,
            id = %upserted.record.id,
            status = upserted.outcome.as_str(),
            "face registered"
        );

        Ok(Registration {
            status,
            id: upserted.record.id,
            identifier: upserted.record.identifier,
            name: upserted.record.display_name,
        })
    }
}

pub struct RecognitionService {
    engine: EngineHandle,
    store: Arc<dyn DescriptorStore>,
    matcher: EuclideanMatcher,
}

impl RecognitionService {
    pub fn new(engine: EngineHandle, store: Arc<dyn DescriptorStore>, matcher: EuclideanMatcher) -> Self {
        Self { engine, store, matcher }
    }

    pub fn tolerance(&self) -> f32 {
        self.matcher.tolerance
    }

    /// Extract the probe descriptor and scan every stored person.
    pub async fn recognize(&self, image: Vec<u8>) -> Result<Recognition, ServiceError> {
        require_image(&image)?;
        let probe = self.engine.extract(image).await?;

        let store = Arc::clone(&self.store);
        let matcher = self.matcher;
        let outcome = run_blocking(move || {
            let gallery = store.all()?;
            Ok(matcher.best_match(&probe, &gallery))
        })
        .await?;

        let recognition = match outcome {
            MatchOutcome::Match(m) => {
                tracing::info!(identifier = %m.identifier, distance = m.distance, "face recognized");
                Recognition::Recognized {
                    identifier: m.identifier,
                    name: m.display_name,
                    confidence: m.confidence,
                    distance: m.distance,
                }
            }
            MatchOutcome::NoMatch { best_distance, scanned, skipped } => {
                tracing::info!(?best_distance, scanned, skipped, "face not recognized");
                Recognition::Unknown
            }
        };
        Ok(recognition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::engine::tests::StubExtractor;
    use facegate_core::{Candidate, Descriptor, DescriptorError, PersonRecord};
    use facegate_store::{SqliteStore, Upserted};
    use std::time::Duration;

    const V1: [f32; 3] = [0.10, 0.20, 0.30];
    const V2: [f32; 3] = [0.60, 0.10, 0.05];

    fn services(stub: StubExtractor, store: Arc<dyn DescriptorStore>) -> (RegistrationService, RecognitionService) {
        let engine = spawn_engine(Box::new(stub), Duration::from_secs(5)).unwrap();
        (
            RegistrationService::new(engine.clone(), Arc::clone(&store)),
            RecognitionService::new(engine, store, EuclideanMatcher::default()),
        )
    }

    fn request(image: &[u8], name: &str, identifier: &str) -> RegisterRequest {
        RegisterRequest { image: image.to_vec(), name: name.into(), identifier: identifier.into() }
    }

    fn memory_store() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::open_in_memory().unwrap())
    }

    /// Delegates to SQLite and appends one undecodable row to every scan.
    struct CorruptRowStore(SqliteStore);

    impl DescriptorStore for CorruptRowStore {
        fn upsert(&self, identifier: &str, display_name: &str, descriptor: &Descriptor) -> Result<Upserted, StoreError> {
            self.0.upsert(identifier, display_name, descriptor)
        }
        fn all(&self) -> Result<Vec<Candidate>, StoreError> {
            let mut rows = self.0.all()?;
            rows.insert(0, Candidate {
                identifier: "broken".into(),
                display_name: "Broken Row".into(),
                descriptor: Err(DescriptorError::Truncated(11)),
            });
            rows.push(Candidate::new("short", "Short Row", Descriptor::new(vec![0.1])));
            Ok(rows)
        }
        fn find_by_identifier(&self, identifier: &str) -> Result<Option<PersonRecord>, StoreError> {
            self.0.find_by_identifier(identifier)
        }
        fn count(&self) -> Result<usize, StoreError> {
            self.0.count()
        }
    }

    struct DownStore;

    impl DescriptorStore for DownStore {
        fn upsert(&self, _: &str, _: &str, _: &Descriptor) -> Result<Upserted, StoreError> {
            Err(StoreError::Poisoned)
        }
        fn all(&self) -> Result<Vec<Candidate>, StoreError> {
            Err(StoreError::Poisoned)
        }
        fn find_by_identifier(&self, _: &str) -> Result<Option<PersonRecord>, StoreError> {
            Err(StoreError::Poisoned)
        }
        fn count(&self) -> Result<usize, StoreError> {
            Err(StoreError::Poisoned)
        }
    }

    #[tokio::test]
    async fn test_empty_store_recognizes_unknown() {
        let stub = StubExtractor::new(3).with_face(b"face", &V1);
        let (_, recognition) = services(stub, memory_store());

        let result = recognition.recognize(b"face".to_vec()).await.unwrap();
        assert_eq!(result, Recognition::Unknown);
        assert_eq!(result.to_json()["identifier"], "UNKNOWN");
        assert_eq!(result.to_json()["confidence"], 0.0);
    }

    #[tokio::test]
    async fn test_reregistration_updates_in_place() {
        let stub = StubExtractor::new(3)
            .with_face(b"alice-1", &V1)
            .with_face(b"alice-2", &V2)
            .with_face(b"probe", &[0.58, 0.11, 0.06]);
        let store = memory_store();
        let (registration, recognition) = services(stub, store.clone());

        let first = registration.register(request(b"alice-1", "Alice", "A001")).await.unwrap();
        assert_eq!(first.status, RegistrationStatus::Created);

        let second = registration.register(request(b"alice-2", "Alice Smith", "A001")).await.unwrap();
        assert_eq!(second.status, RegistrationStatus::Updated);
        assert_eq!(second.id, first.id);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.find_by_identifier("A001").unwrap().unwrap().descriptor.values, V2.to_vec());

        match recognition.recognize(b"probe".to_vec()).await.unwrap() {
            Recognition::Recognized { identifier, name, confidence, .. } => {
                assert_eq!(identifier, "A001");
                assert_eq!(name, "Alice Smith");
                assert!(confidence > 0.9 && confidence <= 1.0);
            }
            Recognition::Unknown => panic!("expected A001"),
        }
    }

    #[tokio::test]
    async fn test_identical_face_full_confidence() {
        let stub = StubExtractor::new(3).with_face(b"bob", &V1);
        let (registration, recognition) = services(stub, memory_store());

        registration.register(request(b"bob", "Bob", "B002")).await.unwrap();
        let result = recognition.recognize(b"bob".to_vec()).await.unwrap();
        assert_eq!(
            result,
            Recognition::Recognized { identifier: "B002".into(), name: "Bob".into(), confidence: 1.0, distance: 0.0 }
        );
        assert_eq!(result.to_json()["status"], "recognized");
    }

    #[tokio::test]
    async fn test_distant_probe_is_unknown() {
        // A and B are 0.9 apart; the probe is 0.7 from each.
        let y = (0.7f32 * 0.7 - 0.45 * 0.45).sqrt();
        let stub = StubExtractor::new(2)
            .with_face(b"a", &[0.0, 0.0])
            .with_face(b"b", &[0.9, 0.0])
            .with_face(b"probe", &[0.45, y]);
        let (registration, recognition) = services(stub, memory_store());

        registration.register(request(b"a", "Person A", "A")).await.unwrap();
        registration.register(request(b"b", "Person B", "B")).await.unwrap();
        assert_eq!(recognition.recognize(b"probe".to_vec()).await.unwrap(), Recognition::Unknown);
    }

    #[tokio::test]
    async fn test_malformed_rows_do_not_break_recognition() {
        let stub = StubExtractor::new(3).with_face(b"carol", &V1);
        let store: Arc<dyn DescriptorStore> = Arc::new(CorruptRowStore(SqliteStore::open_in_memory().unwrap()));
        let (registration, recognition) = services(stub, store);

        registration.register(request(b"carol", "Carol", "C003")).await.unwrap();
        let result = recognition.recognize(b"carol".to_vec()).await.unwrap();
        assert!(matches!(result, Recognition::Recognized { ref identifier, .. } if identifier == "C003"));
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (registration, recognition) = services(StubExtractor::new(3), memory_store());

        let cases = [
            request(b"", "Alice", "A001"),
            request(b"img", "   ", "A001"),
            request(b"img", "Alice", ""),
            request(b"img", "Alice", "123456789012345678901"),
            request(b"img", &"x".repeat(256), "A001"),
        ];
        for case in cases {
            let err = registration.register(case).await.unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)), "got {err:?}");
            assert!(!err.is_retryable());
        }

        let err = recognition.recognize(Vec::new()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(msg) if msg == "missing field: image"));
    }

    #[tokio::test]
    async fn test_fields_are_trimmed() {
        let stub = StubExtractor::new(3).with_face(b"dave", &V1);
        let store = memory_store();
        let (registration, _) = services(stub, store.clone());

        let reg = registration.register(request(b"dave", "  Dave  ", " D004 ")).await.unwrap();
        assert_eq!(reg.identifier, "D004");
        assert_eq!(reg.name, "Dave");
        assert!(store.find_by_identifier("D004").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_extraction_outcomes_are_distinct() {
        let store = memory_store();
        let (registration, recognition) = services(StubExtractor::new(3), store.clone());

        let err = registration.register(request(b"noface", "Eve", "E005")).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoFaceDetected));
        let err = registration.register(request(b"garbage", "Eve", "E005")).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidImage(_)));
        assert_eq!(store.count().unwrap(), 0);

        let err = recognition.recognize(b"noface".to_vec()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoFaceDetected));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_extraction_timeout_is_retryable() {
        let store = memory_store();
        let engine = spawn_engine(Box::new(StubExtractor::new(3)), Duration::from_millis(50)).unwrap();
        let registration = RegistrationService::new(engine, store.clone());

        let err = registration.register(request(b"slow", "Frank", "F006")).await.unwrap_err();
        assert!(matches!(err, ServiceError::ExtractionTimeout));
        assert!(err.is_retryable());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_storage_down_is_retryable() {
        let stub = StubExtractor::new(3).with_face(b"gina", &V1);
        let (registration, recognition) = services(stub, Arc::new(DownStore));

        let err = registration.register(request(b"gina", "Gina", "G007")).await.unwrap_err();
        assert!(matches!(err, ServiceError::StorageUnavailable(_)));
        assert!(err.is_retryable());

        let err = recognition.recognize(b"gina".to_vec()).await.unwrap_err();
        assert!(matches!(err, ServiceError::StorageUnavailable(_)));
    }
}
