use crate::service::{run_blocking, RecognitionService, RegisterRequest, RegistrationService, ServiceError};
use facegate_store::DescriptorStore;
use std::sync::Arc;
use zbus::{interface, DBusError};

pub const BUS_NAME: &str = "org.facegate.Facegate1";
pub const OBJECT_PATH: &str = "/org/facegate/Facegate1";

/// Typed D-Bus errors, one per caller-visible failure kind.
#[derive(Debug, DBusError)]
#[zbus(prefix = "org.facegate.Error")]
pub enum FacegateError {
    #[zbus(error)]
    ZBus(zbus::Error),
    Validation(String),
    InvalidImage(String),
    NoFaceDetected(String),
    ExtractionTimeout(String),
    ExtractorUnavailable(String),
    StorageUnavailable(String),
    NotFound(String),
}

impl From<ServiceError> for FacegateError {
    fn from(err: ServiceError) -> Self {
        let msg = err.to_string();
        if err.is_retryable() {
            tracing::warn!(error = %msg, "request failed on an infrastructure fault");
        }
        match err {
            ServiceError::Validation(_) => FacegateError::Validation(msg),
            ServiceError::InvalidImage(_) => FacegateError::InvalidImage(msg),
            ServiceError::NoFaceDetected => FacegateError::NoFaceDetected(msg),
            ServiceError::ExtractionTimeout => FacegateError::ExtractionTimeout(msg),
            ServiceError::ExtractorUnavailable(_) => FacegateError::ExtractorUnavailable(msg),
            ServiceError::StorageUnavailable(_) => FacegateError::StorageUnavailable(msg),
        }
    }
}

/// D-Bus object for the face registration daemon.
///
/// Bus name: org.facegate.Facegate1
/// Object path: /org/facegate/Facegate1
pub struct FacegateService {
    registration: RegistrationService,
    recognition: RecognitionService,
    store: Arc<dyn DescriptorStore>,
    dimension: usize,
}

impl FacegateService {
    pub fn new(
        registration: RegistrationService,
        recognition: RecognitionService,
        store: Arc<dyn DescriptorStore>,
        dimension: usize,
    ) -> Self {
        Self { registration, recognition, store, dimension }
    }
}

#[interface(name = "org.facegate.Facegate1")]
impl FacegateService {
    /// Register (or re-register) the face in `image` under `identifier`.
    async fn register(&self, image: Vec<u8>, name: String, identifier: String) -> Result<String, FacegateError> {
        tracing::debug!(%identifier, bytes = image.len(), "register requested");
        let registration = self
            .registration
            .register(RegisterRequest { image, name, identifier })
            .await?;
        Ok(serde_json::json!(registration).to_string())
    }

    /// Identify the face in `image`. No match is a successful "unknown" reply.
    async fn recognize(&self, image: Vec<u8>) -> Result<String, FacegateError> {
        tracing::debug!(bytes = image.len(), "recognize requested");
        let recognition = self.recognition.recognize(image).await?;
        Ok(recognition.to_json().to_string())
    }

    /// Metadata of one registered person.
    async fn lookup(&self, identifier: String) -> Result<String, FacegateError> {
        let store = Arc::clone(&self.store);
        let key = identifier.clone();
        let record = run_blocking(move || store.find_by_identifier(&key)).await?;

        let record = record.ok_or_else(|| FacegateError::NotFound(format!("no person registered as {identifier}")))?;
        Ok(serde_json::json!({
            "id": record.id,
            "identifier": record.identifier,
            "name": record.display_name,
            "dimension": record.descriptor.len(),
            "created_at": record.created_at,
            "updated_at": record.updated_at,
        })
        .to_string())
    }

    /// All registered people in registration order.
    async fn list_persons(&self) -> Result<String, FacegateError> {
        let store = Arc::clone(&self.store);
        let rows = run_blocking(move || store.all()).await?;

        let persons: Vec<_> = rows
            .iter()
            .map(|c| {
                serde_json::json!({
                    "identifier": c.identifier,
                    "name": c.display_name,
                    "descriptor_ok": c.descriptor.as_ref().is_ok_and(|d| d.len() == self.dimension),
                })
            })
            .collect();
        Ok(serde_json::Value::Array(persons).to_string())
    }

    /// Daemon status information.
    async fn status(&self) -> Result<String, FacegateError> {
        let store = Arc::clone(&self.store);
        let persons = run_blocking(move || store.count()).await?;

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "persons": persons,
            "descriptor_dimension": self.dimension,
            "match_tolerance": self.recognition.tolerance(),
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_errors_map_to_named_dbus_errors() {
        let cases = [
            (ServiceError::Validation("missing field: name".into()), "org.facegate.Error.Validation"),
            (ServiceError::InvalidImage("bad png".into()), "org.facegate.Error.InvalidImage"),
            (ServiceError::NoFaceDetected, "org.facegate.Error.NoFaceDetected"),
            (ServiceError::ExtractionTimeout, "org.facegate.Error.ExtractionTimeout"),
            (ServiceError::StorageUnavailable("locked".into()), "org.facegate.Error.StorageUnavailable"),
        ];
        for (err, expected) in cases {
            let dbus_err = FacegateError::from(err);
            assert_eq!(DBusError::name(&dbus_err).as_str(), expected);
        }
    }

    #[test]
    fn test_validation_message_preserved() {
        let err = FacegateError::from(ServiceError::Validation("missing field: name".into()));
        assert!(matches!(err, FacegateError::Validation(msg) if msg == "missing field: name"));
    }
}
