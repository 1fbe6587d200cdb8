use facegate_core::{Descriptor, ExtractError, FeatureExtractor};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Pending extraction requests before senders start waiting.
const ENGINE_QUEUE_DEPTH: usize = 8;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("extractor failed: {0}")]
    Extractor(String),
    #[error("extraction did not complete within {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<ExtractError> for EngineError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::InvalidImage(msg) => EngineError::InvalidImage(msg),
            ExtractError::NoFaceDetected => EngineError::NoFaceDetected,
            ExtractError::Failed(msg) => EngineError::Extractor(msg),
        }
    }
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Extract {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Descriptor, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
    dimension: usize,
}

impl EngineHandle {
    /// Descriptor length every successful extraction returns.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Extract the descriptor of the first face in `image`.
    ///
    /// The whole round trip, including time spent queued behind other
    /// requests, is bounded by the engine timeout.
    pub async fn extract(&self, image: Vec<u8>) -> Result<Descriptor, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let round_trip = async {
            self.tx
                .send(EngineRequest::Extract { image, reply: reply_tx })
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
        };

        match tokio::time::timeout(self.timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "feature extraction timed out");
                Err(EngineError::Timeout(self.timeout))
            }
        }
    }
}

/// Spawn the engine on a dedicated OS thread that owns `extractor`.
pub fn spawn_engine(extractor: Box<dyn FeatureExtractor>, timeout: Duration) -> Result<EngineHandle, EngineError> {
    let dimension = extractor.dimension();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(ENGINE_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            let mut extractor = extractor;
            tracing::info!(dimension, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { image, reply } => {
                        if reply.is_closed() {
                            tracing::debug!("caller gone before extraction; skipping");
                            continue;
                        }
                        let started = Instant::now();
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            run_extract(extractor.as_mut(), &image, dimension)
                        }))
                        .unwrap_or_else(|_| {
                            tracing::error!(bytes = image.len(), "extractor panicked; engine keeps serving");
                            Err(EngineError::Extractor("extractor panicked".into()))
                        });
                        tracing::debug!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            ok = result.is_ok(),
                            "extraction finished"
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(|e| EngineError::Spawn(e.to_string()))?;

    Ok(EngineHandle { tx, timeout, dimension })
}

fn run_extract(extractor: &mut dyn FeatureExtractor, image: &[u8], dimension: usize) -> Result<Descriptor, EngineError> {
    let descriptor = extractor.extract(image)?;

    if descriptor.len() != dimension {
        return Err(EngineError::Extractor(format!(
            "extractor returned {}-dim descriptor, expected {dimension}",
            descriptor.len()
        )));
    }
    if let Some(index) = descriptor.first_non_finite() {
        return Err(EngineError::Extractor(format!("descriptor component {index} is not finite")));
    }
    Ok(descriptor)
}
