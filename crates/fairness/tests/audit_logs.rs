//! End-to-end audit runs over on-disk ratings and exposure logs.

use std::fs;
use std::path::{Path, PathBuf};

use data_loader::resolve_log_sources;
use fairness::{AuditError, FairnessAuditor, LightUserPolicy};
use tempfile::TempDir;

fn write_ratings(dir: &Path) -> PathBuf {
    let mut csv = String::from("User_ID,Movie_ID,Rating\n");
    for movie in 0..3 {
        csv.push_str(&format!("42,{},4\n", movie));
    }
    for movie in 0..100 {
        csv.push_str(&format!("7,{},3\n", movie));
    }
    let path = dir.join("final_processed_data.csv");
    fs::write(&path, csv).unwrap();
    path
}

#[test]
fn test_reference_scenario_from_files() {
    let dir = TempDir::new().unwrap();
    let ratings = write_ratings(dir.path());
    fs::write(
        dir.path().join("recs_2025-05-06_a.jsonl"),
        "{\"userId\": 42, \"genres\": [\"Action\", \"Drama\"]}\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("recs_2025-05-06_b.jsonl"),
        "{\"user_id\": 7, \"genres\": [\"Action\", \"Action\", \"Action\"]}\n",
    )
    .unwrap();

    let auditor = FairnessAuditor::from_dataset(&ratings, LightUserPolicy::default()).unwrap();
    let sources =
        resolve_log_sources(&[format!("{}/recs_2025-05-06*.jsonl", dir.path().display())]).unwrap();
    let report = auditor.audit_sources(&sources).unwrap();

    assert_eq!(report.summary_line(), "KL(light || global) = 0.223");
    assert_eq!(report.tally.entries, 2);
    assert_eq!(report.tally.light_entries, 1);
    assert_eq!(report.tally.global.total(), 5);
    assert_eq!(report.tally.light.total(), 2);
    assert_eq!(report.tally.sources.len(), 2);
    assert_eq!(report.skipped(), 0);
}

#[test]
fn test_malformed_entries_are_skipped_and_reported() {
    let dir = TempDir::new().unwrap();
    let ratings = write_ratings(dir.path());
    let log = dir.path().join("recs.jsonl");
    fs::write(
        &log,
        concat!(
            "{\"userId\": 42, \"genres\": [\"Action\", \"Drama\"]}\n",
            "{\"userId\": 42, \"genres\": \"Action\"}\n",
            "{\"genres\": [\"Comedy\"]}\n",
            "{\"userId\": 7, \"genres\": [\"Action\", \"Action\", \"Action\"]}\n",
            "{truncated\n",
        ),
    )
    .unwrap();

    let auditor = FairnessAuditor::from_dataset(&ratings, LightUserPolicy::default()).unwrap();
    let report = auditor.audit_sources(&[log]).unwrap();

    assert_eq!(report.skipped(), 3);
    assert_eq!(report.tally.entries, 2);
    assert_eq!(report.summary_line(), "KL(light || global) = 0.223");
}

#[test]
fn test_non_utf8_entry_is_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let ratings = write_ratings(dir.path());
    let log = dir.path().join("recs.jsonl");
    let mut bytes = b"{\"userId\": 42, \"genres\": [\"Action\", \"Drama\"]}\n".to_vec();
    bytes.extend_from_slice(b"{\"userId\": 42, \"genres\": [\"Act\xffon\"]}\n");
    bytes.extend_from_slice(b"{\"userId\": 7, \"genres\": [\"Action\", \"Action\", \"Action\"]}\n");
    fs::write(&log, bytes).unwrap();

    let auditor = FairnessAuditor::from_dataset(&ratings, LightUserPolicy::default()).unwrap();
    let report = auditor.audit_sources(&[log]).unwrap();

    assert_eq!(report.skipped(), 1);
    assert_eq!(report.tally.entries, 2);
    assert_eq!(report.summary_line(), "KL(light || global) = 0.223");
}

#[test]
fn test_no_exposure_entries_is_an_explicit_failure() {
    let dir = TempDir::new().unwrap();
    let ratings = write_ratings(dir.path());
    let log = dir.path().join("recs_empty.jsonl");
    fs::write(&log, "\n").unwrap();

    let auditor = FairnessAuditor::from_dataset(&ratings, LightUserPolicy::default()).unwrap();
    let err = auditor.audit_sources(&[log]).unwrap_err();

    assert!(matches!(err, AuditError::EmptyGlobalDistribution));
}

#[test]
fn test_threshold_changes_classification() {
    let dir = TempDir::new().unwrap();
    let ratings = write_ratings(dir.path());
    let log = dir.path().join("recs.jsonl");
    fs::write(
        &log,
        concat!(
            "{\"userId\": 42, \"genres\": [\"Action\", \"Drama\"]}\n",
            "{\"userId\": 7, \"genres\": [\"Action\", \"Action\", \"Action\"]}\n",
        ),
    )
    .unwrap();

    // threshold 2: user 42 (3 ratings) is no longer light
    let auditor = FairnessAuditor::from_dataset(&ratings, LightUserPolicy::new(2)).unwrap();
    let report = auditor.audit_sources(&[log.clone()]).unwrap();
    assert_eq!(report.tally.light_entries, 0);
    assert_eq!(report.summary_line(), "KL(light || global) = 0.000");

    // threshold 100: everyone is light and the distributions coincide
    let auditor = FairnessAuditor::from_dataset(&ratings, LightUserPolicy::new(100)).unwrap();
    let report = auditor.audit_sources(&[log]).unwrap();
    assert_eq!(report.tally.light_entries, 2);
    assert!(report.divergence.abs() < 1e-12);
}
