//! Gateway configuration.
//!
//! Read once at startup from a TOML file and turned into a
//! [`RecommendationGateway`] by [`build_gateway`]:
//!
//! ```toml
//! experiment_key = "ab-testing"
//! listen_addr = "0.0.0.0:8082"
//!
//! [flags]
//! provider = "rollout"
//! timeout_ms = 250
//!
//! [[flags.rollout]]
//! variant = "model_a"
//! weight = 50
//!
//! [[flags.rollout]]
//! variant = "model_b"
//! weight = 50
//!
//! [provenance]
//! path = "logs/provenance.jsonl"
//! queue_capacity = 1024
//!
//! [exposure]
//! path = "logs/exposure.jsonl"
//! catalog = "data/movies.dat"
//!
//! [[models]]
//! variant = "model_a"
//! artifact = "models/svd_20250425.json"
//!
//! [[models]]
//! variant = "model_b"
//! artifact = "models/svdpp_20250425.json"
//! model_version = "svdpp-2025-04-25"
//! ```

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use data_loader::{DataLoadError, parse_catalog};
use recommender::{ArtifactRecommender, RecommenderError};

use crate::assignor::{DEFAULT_EVALUATION_TIMEOUT, ExperimentAssignor};
use crate::flags::{Allocation, FlagError, FlagEvaluator, HttpFlagEvaluator, RolloutEvaluator};
use crate::gateway::{DEFAULT_EXPERIMENT_KEY, RecommendationGateway};
use crate::recorder::{
    DEFAULT_QUEUE_CAPACITY, ExposureRecorder, JsonlFileSink, ProvenanceRecorder, SinkError,
};
use crate::registry::{ModelRegistry, RegistryError};
use crate::variant::Variant;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to load model for {variant}: {source}")]
    Model {
        variant: Variant,
        #[source]
        source: RecommenderError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to load catalog: {0}")]
    Catalog(#[from] DataLoadError),

    #[error("Failed to open recorder: {0}")]
    Recorder(#[from] SinkError),

    #[error("Failed to set up flag provider: {0}")]
    Flag(#[from] FlagError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagProvider {
    #[default]
    Rollout,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagsConfig {
    #[serde(default)]
    pub provider: FlagProvider,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Base URL of the flag service (`provider = "http"`)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Allocation table (`provider = "rollout"`). Empty means an even split
    /// over the configured models.
    #[serde(default)]
    pub rollout: Vec<Allocation>,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            provider: FlagProvider::default(),
            timeout_ms: default_timeout_ms(),
            endpoint: None,
            rollout: Vec::new(),
        }
    }
}

impl FlagsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvenanceConfig {
    #[serde(default = "default_provenance_path")]
    pub path: PathBuf,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            path: default_provenance_path(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExposureConfig {
    pub path: PathBuf,
    /// MovieLens `movies.dat` used to map items to genres
    pub catalog: PathBuf,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub variant: Variant,
    pub artifact: PathBuf,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub data_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_experiment_key")]
    pub experiment_key: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default)]
    pub flags: FlagsConfig,
    #[serde(default)]
    pub provenance: ProvenanceConfig,
    #[serde(default)]
    pub exposure: Option<ExposureConfig>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

fn default_experiment_key() -> String {
    DEFAULT_EXPERIMENT_KEY.to_string()
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8082))
}

fn default_timeout_ms() -> u64 {
    DEFAULT_EVALUATION_TIMEOUT.as_millis() as u64
}

fn default_provenance_path() -> PathBuf {
    PathBuf::from("logs/provenance.jsonl")
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.experiment_key.trim().is_empty() {
            return Err(ConfigError::Invalid("experiment_key must not be empty".to_string()));
        }
        if self.flags.provider == FlagProvider::Http && self.flags.endpoint.is_none() {
            return Err(ConfigError::Invalid(
                "flags.endpoint is required when flags.provider = \"http\"".to_string(),
            ));
        }
        if self.flags.timeout_ms == 0 {
            return Err(ConfigError::Invalid("flags.timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Rollout table, defaulting to an even split over the configured models
    pub fn rollout(&self) -> Vec<Allocation> {
        if !self.flags.rollout.is_empty() {
            return self.flags.rollout.clone();
        }
        self.models
            .iter()
            .map(|model| Allocation::new(model.variant.label(), 1))
            .collect()
    }
}

/// Load every configured model and wire up a gateway.
///
/// Starts the recorder writer threads; call
/// [`RecommendationGateway::shutdown`] to drain them.
pub fn build_gateway(config: &GatewayConfig) -> Result<RecommendationGateway, ConfigError> {
    let mut handles = Vec::with_capacity(config.models.len());
    for model in &config.models {
        let handle = ArtifactRecommender::load_handle(
            &model.artifact,
            model.model_version.clone(),
            model.data_version.clone(),
        )
        .map_err(|source| ConfigError::Model {
            variant: model.variant,
            source,
        })?;
        handles.push((model.variant, handle));
    }
    let registry = Arc::new(ModelRegistry::new(handles)?);

    let evaluator: Arc<dyn FlagEvaluator> = match config.flags.provider {
        FlagProvider::Rollout => Arc::new(RolloutEvaluator::new(&config.experiment_key, config.rollout())?),
        FlagProvider::Http => {
            let endpoint = config.flags.endpoint.clone().unwrap_or_default();
            Arc::new(HttpFlagEvaluator::new(endpoint, config.flags.timeout())?)
        }
    };
    let assignor = Arc::new(ExperimentAssignor::for_registry(
        evaluator,
        &registry,
        config.flags.timeout(),
    ));

    let provenance = Arc::new(ProvenanceRecorder::spawn(
        "provenance",
        JsonlFileSink::open(&config.provenance.path)?,
        config.provenance.queue_capacity,
    )?);
    info!("Provenance records go to {}", config.provenance.path.display());

    let mut gateway = RecommendationGateway::new(&config.experiment_key, assignor, registry, provenance);

    if let Some(exposure) = &config.exposure {
        let catalog = parse_catalog(&exposure.catalog)?;
        let recorder = ExposureRecorder::spawn(
            "exposure",
            JsonlFileSink::open(&exposure.path)?,
            exposure.queue_capacity,
        )?;
        info!(
            "Exposure entries go to {} ({} movies in catalog)",
            exposure.path.display(),
            catalog.len()
        );
        gateway = gateway.with_exposure_log(Arc::new(catalog), Arc::new(recorder));
    }

    Ok(gateway)
}
