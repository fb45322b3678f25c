//! # Recommendation Gateway
//!
//! Serves one request end to end:
//! 1. Assign the user to an experiment variant
//! 2. Resolve the variant's model in the registry
//! 3. Run the model on the blocking pool
//! 4. Turn ranked ids into the response list, order preserved
//! 5. Queue a provenance record (and an exposure entry when a catalog is set)
//! 6. Respond
//!
//! Each step is a [`RequestState`] transition, logged at `debug`. A model
//! failure ends the request in [`RequestState::Failed`]; nothing after the
//! model can fail it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use data_loader::{Catalog, ExposureLogEntry, ProvenanceRecord, UserId};
use recommender::{ModelHandle, RankedItems, RecommenderError};

use crate::assignor::{Assignment, ExperimentAssignor, FallbackReason};
use crate::recorder::{ExposureRecorder, ProvenanceRecorder, QueueStats};
use crate::registry::{ModelRegistry, RegistryError};
use crate::variant::Variant;

/// Experiment key used when none is configured
pub const DEFAULT_EXPERIMENT_KEY: &str = "ab-testing";

/// Lifecycle of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    VariantAssigned,
    ModelInvoked,
    ResultTransformed,
    ProvenanceLogged,
    Responded,
    Failed,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Received => "received",
            RequestState::VariantAssigned => "variant_assigned",
            RequestState::ModelInvoked => "model_invoked",
            RequestState::ResultTransformed => "result_transformed",
            RequestState::ProvenanceLogged => "provenance_logged",
            RequestState::Responded => "responded",
            RequestState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Model for variant {variant} is unavailable: {source}")]
    ModelUnavailable {
        variant: Variant,
        #[source]
        source: RecommenderError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Body of a successful `GET /recommend/{userId}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecommendationResponse {
    pub recommendations: Vec<String>,
}

/// Everything the gateway decided while serving one request
#[derive(Debug)]
pub struct ServedRecommendation {
    pub user_id: UserId,
    pub assignment: Assignment,
    pub recommendations: Vec<String>,
    pub model_version: String,
    pub data_version: String,
    pub state: RequestState,
}

impl ServedRecommendation {
    pub fn variant(&self) -> Variant {
        self.assignment.variant
    }

    pub fn response(&self) -> RecommendationResponse {
        RecommendationResponse {
            recommendations: self.recommendations.clone(),
        }
    }
}

/// Requests currently inside [`RecommendationGateway::recommend`]
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[derive(Clone)]
struct ExposureLog {
    catalog: Arc<Catalog>,
    recorder: Arc<ExposureRecorder>,
}

/// Per-request orchestration over shared, read-only components.
///
/// Cloning is cheap; clones share the assignor, registry and recorders.
#[derive(Clone)]
pub struct RecommendationGateway {
    experiment_key: Arc<str>,
    assignor: Arc<ExperimentAssignor>,
    registry: Arc<ModelRegistry>,
    provenance: Arc<ProvenanceRecorder>,
    exposure: Option<ExposureLog>,
    in_flight: Arc<InFlight>,
}

impl RecommendationGateway {
    /// # Arguments
    /// * `experiment_key` - Flag evaluated for every request
    /// * `assignor` - Variant assignment
    /// * `registry` - Loaded models
    /// * `provenance` - Where provenance records are queued
    pub fn new(
        experiment_key: impl Into<String>,
        assignor: Arc<ExperimentAssignor>,
        registry: Arc<ModelRegistry>,
        provenance: Arc<ProvenanceRecorder>,
    ) -> Self {
        Self {
            experiment_key: Arc::from(experiment_key.into()),
            assignor,
            registry,
            provenance,
            exposure: None,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Also log the genres of every served response
    pub fn with_exposure_log(mut self, catalog: Arc<Catalog>, recorder: Arc<ExposureRecorder>) -> Self {
        self.exposure = Some(ExposureLog { catalog, recorder });
        self
    }

    pub fn experiment_key(&self) -> &str {
        &self.experiment_key
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Serve one recommendation request
    pub async fn recommend(&self, user_id: UserId) -> Result<ServedRecommendation, GatewayError> {
        let _in_flight = self.in_flight.enter();
        let start_time = Instant::now();
        let mut state = RequestState::Received;
        transition(user_id, &mut state, RequestState::Received);

        let mut assignment = self.assignor.assign_detailed(&self.experiment_key, user_id).await;
        let handle = match self.registry.resolve(assignment.variant) {
            Ok(handle) => handle.clone(),
            Err(e) => {
                // The registry always holds the baseline
                warn!(
                    "{}; serving user {} with {} instead",
                    e,
                    user_id,
                    Variant::BASELINE
                );
                let baseline = match self.registry.resolve(Variant::BASELINE) {
                    Ok(handle) => handle.clone(),
                    Err(e) => {
                        transition(user_id, &mut state, RequestState::Failed);
                        error!("No baseline model for user {}: {}", user_id, e);
                        return Err(e.into());
                    }
                };
                if assignment.fallback.is_none() {
                    assignment.fallback = Some(FallbackReason::NotDeployed(assignment.variant));
                }
                assignment.variant = Variant::BASELINE;
                baseline
            }
        };
        let variant = assignment.variant;
        transition(user_id, &mut state, RequestState::VariantAssigned);

        let ranked = match run_model(&handle, user_id).await {
            Ok(ranked) => ranked,
            Err(source) => {
                transition(user_id, &mut state, RequestState::Failed);
                error!("Model {} failed for user {}: {}", variant, user_id, source);
                return Err(GatewayError::ModelUnavailable { variant, source });
            }
        };
        transition(user_id, &mut state, RequestState::ModelInvoked);

        let recommendations: Vec<String> = ranked.iter().map(|id| id.to_string()).collect();
        transition(user_id, &mut state, RequestState::ResultTransformed);

        if let Some(exposure) = &self.exposure {
            let entry = ExposureLogEntry::new(user_id, exposure.catalog.genres_for(&ranked));
            if let Err(e) = exposure.recorder.append(entry) {
                warn!("Failed to queue exposure entry for user {}: {}", user_id, e);
            }
        }

        let record = ProvenanceRecord::new(
            Utc::now(),
            user_id,
            handle.model_version(),
            handle.data_version(),
            recommendations.clone(),
        );
        info!(
            "Provenance: user={} variant={} model_version={} data_version={} count={}",
            record.user_id(),
            variant,
            record.model_version(),
            record.data_version(),
            record.count()
        );
        if let Err(e) = self.provenance.append(record) {
            warn!("Failed to queue provenance record for user {}: {}", user_id, e);
        }
        transition(user_id, &mut state, RequestState::ProvenanceLogged);

        transition(user_id, &mut state, RequestState::Responded);
        debug!("Served user {} in {:.2?}", user_id, start_time.elapsed());

        Ok(ServedRecommendation {
            user_id,
            assignment,
            recommendations,
            model_version: handle.model_version().to_string(),
            data_version: handle.data_version().to_string(),
            state,
        })
    }

    /// Number of requests currently being served
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Wait for requests already being served, then drain and stop the
    /// recorders. Pending records are written first.
    pub async fn shutdown(&self) -> GatewayStats {
        let waiting = self.in_flight();
        if waiting > 0 {
            info!("Waiting for {} in-flight requests before closing recorders", waiting);
        }
        self.in_flight.wait_idle().await;

        let provenance = Arc::clone(&self.provenance);
        let exposure = self.exposure.as_ref().map(|log| Arc::clone(&log.recorder));

        let joined = tokio::task::spawn_blocking(move || GatewayStats {
            provenance: provenance.shutdown(),
            exposure: exposure.map(|recorder| recorder.shutdown()),
        })
        .await;

        match joined {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Recorder shutdown task failed: {}", e);
                GatewayStats {
                    provenance: self.provenance.stats(),
                    exposure: self.exposure.as_ref().map(|log| log.recorder.stats()),
                }
            }
        }
    }
}

/// Recorder counters at shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayStats {
    pub provenance: QueueStats,
    pub exposure: Option<QueueStats>,
}

fn transition(user_id: UserId, state: &mut RequestState, next: RequestState) {
    debug!("Request for user {}: {} -> {}", user_id, state, next);
    *state = next;
}

/// Run the model off the async executor. A panicking model is reported as an
/// inference failure.
async fn run_model(handle: &ModelHandle, user_id: UserId) -> Result<RankedItems, RecommenderError> {
    let model = handle.recommender();
    tokio::task::spawn_blocking(move || model.recommend(user_id))
        .await
        .map_err(|e| RecommenderError::Inference(format!("model task failed: {}", e)))?
}
