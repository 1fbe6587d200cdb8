use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/etc/facegate/facegated.toml";

/// Which D-Bus bus the daemon claims its name on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    System,
    Session,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(BusKind::System),
            "session" => Ok(BusKind::Session),
            other => Err(format!("unknown bus '{other}', expected system or session")),
        }
    }
}

/// Daemon configuration: optional TOML file, then `FACEGATE_*` overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub bus: BusKind,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// SQLite database file, or `:memory:`.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance for an accepted match.
    pub match_tolerance: f32,
    /// Upper bound on one feature extraction, queueing included.
    pub extraction_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        Self {
            bus: BusKind::System,
            model_dir: facegate_core::default_model_dir(),
            db_path: data_dir.join("faces.db"),
            match_tolerance: facegate_core::DEFAULT_TOLERANCE,
            extraction_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load `$FACEGATE_CONFIG` (default `/etc/facegate/facegated.toml`) if it
    /// exists, then apply environment overrides and validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var("FACEGATE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `FACEGATE_*` variables supplied by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bus) = env_parse(&lookup, "FACEGATE_BUS") {
            self.bus = bus;
        }
        if let Some(dir) = lookup("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("FACEGATE_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(tolerance) = env_parse(&lookup, "FACEGATE_MATCH_TOLERANCE") {
            self.match_tolerance = tolerance;
        }
        if let Some(secs) = env_parse(&lookup, "FACEGATE_EXTRACTION_TIMEOUT_SECS") {
            self.extraction_timeout_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.match_tolerance.is_finite() || self.match_tolerance <= 0.0 {
            bail!("match_tolerance must be a positive number, got {}", self.match_tolerance);
        }
        if self.extraction_timeout_secs == 0 {
            bail!("extraction_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir.join("det_10g.onnx").to_string_lossy().into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir.join("w600k_r50.onnx").to_string_lossy().into_owned()
    }
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
