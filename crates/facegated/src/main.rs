use anyhow::{Context, Result};
use facegate_core::{EuclideanMatcher, OnnxExtractor};
use facegate_store::{DescriptorStore, SqliteStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod service;

use config::{BusKind, Config};
use dbus_interface::{FacegateService, BUS_NAME, OBJECT_PATH};
use service::{RecognitionService, RegistrationService};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bus = ?config.bus,
        db = %config.db_path.display(),
        models = %config.model_dir.display(),
        tolerance = config.match_tolerance,
        "facegated starting"
    );

    let store: Arc<dyn DescriptorStore> = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("opening descriptor store {}", config.db_path.display()))?,
    );

    // Fail fast: no point claiming the bus name without models.
    let extractor = OnnxExtractor::load(&config.scrfd_model_path(), &config.arcface_model_path())
        .context("loading face models")?;
    let engine = engine::spawn_engine(Box::new(extractor), config.extraction_timeout())?;
    let dimension = engine.dimension();

    let service = FacegateService::new(
        RegistrationService::new(engine.clone(), Arc::clone(&store)),
        RecognitionService::new(engine, Arc::clone(&store), EuclideanMatcher::new(config.match_tolerance)),
        store,
        dimension,
    );

    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("claiming {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(bus_name = BUS_NAME, path = OBJECT_PATH, "facegated ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
