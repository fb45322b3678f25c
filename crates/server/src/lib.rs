//! # Server Crate
//!
//! Online side of ReelRecs: assigns each request to an experiment variant,
//! serves it with that variant's model and records what was served.
//!
//! ## Main Components
//!
//! - **variant**: the closed set of experiment variants
//! - **flags**: flag providers (local rollout, remote HTTP service)
//! - **assignor**: user → variant, with baseline fallback
//! - **registry**: immutable variant → model table
//! - **recorder**: bounded queues writing provenance and exposure logs
//! - **gateway**: the per-request state machine
//! - **config**: TOML configuration and gateway wiring
//! - **http**: axum routes
//!
//! ## Example Usage
//!
//! ```ignore
//! use server::{GatewayConfig, build_gateway};
//! use std::path::Path;
//!
//! let config = GatewayConfig::load(Path::new("reel-recs.toml"))?;
//! let gateway = build_gateway(&config)?;
//! let served = gateway.recommend(42).await?;
//! println!("{} -> {:?}", served.variant(), served.recommendations);
//! gateway.shutdown().await;
//! ```

pub mod assignor;
pub mod config;
pub mod flags;
pub mod gateway;
pub mod http;
pub mod recorder;
pub mod registry;
pub mod variant;

pub use assignor::{Assignment, DEFAULT_EVALUATION_TIMEOUT, ExperimentAssignor, FallbackReason};
pub use config::{ConfigError, GatewayConfig, build_gateway};
pub use flags::{
    Allocation, FlagError, FlagEvaluator, HttpFlagEvaluator, RolloutEvaluator, SubjectContext,
};
pub use gateway::{
    DEFAULT_EXPERIMENT_KEY, GatewayError, GatewayStats, RecommendationGateway,
    RecommendationResponse, RequestState, ServedRecommendation,
};
pub use http::{ApiError, router, serve, serve_on};
pub use recorder::{
    ExposureRecorder, JsonlFileSink, MemorySink, ProvenanceRecorder, QueueStats, RecordQueue,
    RecordSink, SinkError,
};
pub use registry::{ModelRegistry, RegistryError};
pub use variant::Variant;
