//! Fixtures shared by the gateway integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use data_loader::{ProvenanceRecord, UserId};
use parking_lot::Mutex;
use recommender::{ModelHandle, ModelMetadata, RankedItems, Recommender, RecommenderError};
use server::{
    ExperimentAssignor, FlagError, FlagEvaluator, MemorySink, ModelRegistry, ProvenanceRecorder,
    RecommendationGateway, RecordSink, SubjectContext, Variant,
};

// ============================================================================
// Mock flag providers
// ============================================================================

/// Always answers with the same token
pub struct FixedToken(pub &'static str);

#[async_trait]
impl FlagEvaluator for FixedToken {
    async fn evaluate(&self, _key: &str, _subject: &SubjectContext) -> Result<String, FlagError> {
        Ok(self.0.to_string())
    }
}

/// Even user ids get model_b, odd ones model_a
pub struct Parity;

#[async_trait]
impl FlagEvaluator for Parity {
    async fn evaluate(&self, _key: &str, subject: &SubjectContext) -> Result<String, FlagError> {
        let id: u32 = subject.key.parse().map_err(|_| FlagError::MalformedResponse(subject.key.clone()))?;
        Ok(if id % 2 == 0 { "model_b" } else { "model_a" }.to_string())
    }
}

pub fn expected_variant(user_id: UserId) -> Variant {
    if user_id % 2 == 0 {
        Variant::ModelB
    } else {
        Variant::ModelA
    }
}

// ============================================================================
// Mock recommenders
// ============================================================================

/// Returns `[user_id * 10 + offset, ...]` so responses are traceable
pub struct Echo {
    pub offset: u32,
}

impl Recommender for Echo {
    fn recommend(&self, user_id: UserId) -> Result<RankedItems, RecommenderError> {
        Ok(vec![user_id * 10 + self.offset, self.offset, 1])
    }
}

/// Takes its time before answering like `Echo`
pub struct Slow {
    pub delay: Duration,
}

impl Recommender for Slow {
    fn recommend(&self, user_id: UserId) -> Result<RankedItems, RecommenderError> {
        std::thread::sleep(self.delay);
        Ok(vec![user_id * 10 + 2, 2, 1])
    }
}

pub struct Failing;

impl Recommender for Failing {
    fn recommend(&self, _user_id: UserId) -> Result<RankedItems, RecommenderError> {
        Err(RecommenderError::Inference("model server unreachable".to_string()))
    }
}

pub fn model_version(variant: Variant) -> String {
    format!("models/{}.json", variant)
}

/// Registry with model_a and model_b; model_b is `model_b`
pub fn registry(model_b: impl Recommender + 'static) -> Arc<ModelRegistry> {
    Arc::new(
        ModelRegistry::new([
            (
                Variant::ModelA,
                ModelHandle::new(
                    Echo { offset: 1 },
                    ModelMetadata::new(model_version(Variant::ModelA), "data/ratings.csv"),
                ),
            ),
            (
                Variant::ModelB,
                ModelHandle::new(
                    model_b,
                    ModelMetadata::new(model_version(Variant::ModelB), "data/ratings.csv"),
                ),
            ),
        ])
        .expect("valid registry"),
    )
}

// ============================================================================
// Gateway builders
// ============================================================================

pub fn gateway_with_sink(
    evaluator: impl FlagEvaluator + 'static,
    model_b: impl Recommender + 'static,
    sink: impl RecordSink<ProvenanceRecord>,
    capacity: usize,
) -> RecommendationGateway {
    let registry = registry(model_b);
    let assignor = Arc::new(ExperimentAssignor::for_registry(
        Arc::new(evaluator),
        &registry,
        Duration::from_millis(250),
    ));
    let recorder = Arc::new(ProvenanceRecorder::spawn("provenance", sink, capacity).expect("recorder starts"));
    RecommendationGateway::new("ab-testing", assignor, registry, recorder)
}

/// Gateway recording into memory; the returned handle reads what was written
pub fn memory_gateway(
    evaluator: impl FlagEvaluator + 'static,
    model_b: impl Recommender + 'static,
) -> (RecommendationGateway, Arc<Mutex<Vec<ProvenanceRecord>>>) {
    let sink = MemorySink::new();
    let records = sink.records();
    (gateway_with_sink(evaluator, model_b, sink, 1024), records)
}
