mod common;

use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use data_loader::ProvenanceRecord;
use server::{GatewayError, JsonlFileSink, RecordSink, RequestState, SinkError, Variant};
use tempfile::TempDir;

use common::{expected_variant, gateway_with_sink, memory_gateway, model_version, Echo, Failing, FixedToken, Parity};

/// Sink whose disk is always full
struct FullDisk {
    attempts: Arc<AtomicUsize>,
}

impl RecordSink<ProvenanceRecord> for FullDisk {
    fn append(&mut self, _record: &ProvenanceRecord) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Io {
            path: "logs/provenance.jsonl".to_string(),
            source: std::io::Error::other("no space left on device"),
        })
    }
}

#[tokio::test]
async fn test_one_provenance_record_per_request() {
    let (gateway, records) = memory_gateway(Parity, Echo { offset: 2 });

    for user_id in 1..=10 {
        let served = gateway.recommend(user_id).await.expect("request succeeds");
        assert_eq!(served.state, RequestState::Responded);
    }
    let stats = gateway.shutdown().await;
    assert_eq!(stats.provenance.written, 10);

    let records = records.lock();
    assert_eq!(records.len(), 10, "exactly one record per request");
    for record in records.iter() {
        assert_eq!(record.count(), record.recommendations().len());
        assert_eq!(record.count(), 3);
        assert_eq!(record.model_version(), model_version(expected_variant(record.user_id())));
        assert_eq!(record.data_version(), "data/ratings.csv");
    }
}

#[tokio::test]
async fn test_unknown_token_serves_baseline() {
    let (gateway, records) = memory_gateway(FixedToken("model_z"), Echo { offset: 2 });

    let served = gateway.recommend(42).await.expect("fallback still serves");
    assert_eq!(served.variant(), Variant::BASELINE);
    assert!(served.assignment.is_fallback());
    // baseline Echo has offset 1
    assert_eq!(served.recommendations, vec!["421", "1", "1"]);

    gateway.shutdown().await;
    let records = records.lock();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].model_version(), "models/model_a.json");
}

#[tokio::test]
async fn test_model_failure_is_surfaced_without_provenance() {
    let (gateway, records) = memory_gateway(FixedToken("model_b"), Failing);

    let err = gateway.recommend(7).await.expect_err("model failure must surface");
    assert!(matches!(err, GatewayError::ModelUnavailable { variant: Variant::ModelB, .. }));

    // no cross-variant retry: the baseline was not consulted either
    let stats = gateway.shutdown().await;
    assert_eq!(stats.provenance.submitted, 0);
    assert!(records.lock().is_empty());
}

#[tokio::test]
async fn test_provenance_failure_does_not_fail_request() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let gateway = gateway_with_sink(
        FixedToken("model_b"),
        Echo { offset: 2 },
        FullDisk { attempts: Arc::clone(&attempts) },
        16,
    );

    let served = gateway.recommend(3).await.expect("response survives sink failure");
    assert_eq!(served.recommendations, vec!["32", "2", "1"]);

    let stats = gateway.shutdown().await;
    assert_eq!(stats.provenance.failed, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_write_whole_consistent_lines() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("provenance.jsonl");
    let sink = JsonlFileSink::open(&path).expect("sink opens");
    let gateway = gateway_with_sink(Parity, Echo { offset: 2 }, sink, 1024);

    let mut handles = Vec::new();
    for user_id in 1..=100u32 {
        let gateway = gateway.clone();
        handles.push(tokio::spawn(async move { gateway.recommend(user_id).await }));
    }
    for handle in handles {
        handle.await.expect("task joins").expect("request succeeds");
    }
    let stats = gateway.shutdown().await;
    assert_eq!(stats.provenance.written, 100);
    assert_eq!(stats.provenance.dropped, 0);

    let contents = fs::read_to_string(&path).expect("log readable");
    let records: Vec<ProvenanceRecord> = contents
        .lines()
        .map(|line| ProvenanceRecord::from_json_line(line).expect("line is a whole record"))
        .collect();
    assert_eq!(records.len(), 100);

    let users: HashSet<u32> = records.iter().map(|r| r.user_id()).collect();
    assert_eq!(users.len(), 100, "every request recorded once");
    for record in &records {
        let variant = expected_variant(record.user_id());
        assert_eq!(record.model_version(), model_version(variant));
        let offset = if variant == Variant::ModelB { 2 } else { 1 };
        assert_eq!(record.recommendations()[0], (record.user_id() * 10 + offset).to_string());
    }
}

#[tokio::test]
async fn test_assignment_is_stable_across_requests() {
    let (gateway, _) = memory_gateway(Parity, Echo { offset: 2 });
    for user_id in 1..=20 {
        let first = gateway.recommend(user_id).await.expect("served").variant();
        let second = gateway.recommend(user_id).await.expect("served").variant();
        assert_eq!(first, second);
        assert_eq!(first, expected_variant(user_id));
    }
    gateway.shutdown().await;
}
