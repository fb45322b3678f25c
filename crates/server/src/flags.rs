//! Flag evaluation.
//!
//! The assignor asks a [`FlagEvaluator`] which token a subject gets for an
//! experiment. Two providers exist:
//! - [`RolloutEvaluator`]: local weighted percentage rollout, deterministic in
//!   `(experiment key, subject key)`
//! - [`HttpFlagEvaluator`]: remote flag service reached over HTTP

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use data_loader::UserId;

/// Errors from a flag provider. The assignor never lets these reach a request.
#[derive(Error, Debug)]
pub enum FlagError {
    #[error("Flag provider unreachable: {0}")]
    Unreachable(String),

    #[error("Flag provider returned HTTP {0}")]
    Status(u16),

    #[error("Malformed flag provider response: {0}")]
    MalformedResponse(String),

    #[error("Flag evaluation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unknown flag {0}")]
    UnknownFlag(String),

    #[error("Invalid rollout: {0}")]
    InvalidRollout(String),

    #[error("Invalid flag service endpoint {0}")]
    InvalidEndpoint(String),
}

/// Who a flag is being evaluated for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectContext {
    pub key: String,
    pub kind: String,
}

impl SubjectContext {
    pub fn user(user_id: UserId) -> Self {
        Self {
            key: user_id.to_string(),
            kind: "user".to_string(),
        }
    }
}

#[async_trait]
pub trait FlagEvaluator: Send + Sync {
    /// Evaluate `experiment_key` for `subject`, returning the raw variation
    /// token.
    async fn evaluate(&self, experiment_key: &str, subject: &SubjectContext) -> Result<String, FlagError>;
}

// =============================================================================
// Local rollout
// =============================================================================

/// One bucket of a percentage rollout
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Allocation {
    #[serde(alias = "variant")]
    pub token: String,
    pub weight: u32,
}

impl Allocation {
    pub fn new(token: impl Into<String>, weight: u32) -> Self {
        Self {
            token: token.into(),
            weight,
        }
    }
}

/// Weighted rollout for a single flag.
///
/// The bucket is taken from SHA-256 of `"{flag}.{subject}"`, so a subject
/// always lands in the same bucket for an unchanged allocation table.
#[derive(Debug, Clone)]
pub struct RolloutEvaluator {
    flag_key: String,
    allocations: Vec<Allocation>,
    total_weight: u64,
}

impl RolloutEvaluator {
    pub fn new(flag_key: impl Into<String>, allocations: Vec<Allocation>) -> Result<Self, FlagError> {
        let total_weight: u64 = allocations.iter().map(|a| u64::from(a.weight)).sum();
        if total_weight == 0 {
            return Err(FlagError::InvalidRollout(
                "allocation weights must sum to more than zero".to_string(),
            ));
        }
        Ok(Self {
            flag_key: flag_key.into(),
            allocations,
            total_weight,
        })
    }

    fn bucket(&self, subject_key: &str) -> u64 {
        let digest = Sha256::digest(format!("{}.{}", self.flag_key, subject_key).as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix) % self.total_weight
    }
}

#[async_trait]
impl FlagEvaluator for RolloutEvaluator {
    async fn evaluate(&self, experiment_key: &str, subject: &SubjectContext) -> Result<String, FlagError> {
        if experiment_key != self.flag_key {
            return Err(FlagError::UnknownFlag(experiment_key.to_string()));
        }

        let bucket = self.bucket(&subject.key);
        let mut upper = 0u64;
        for allocation in &self.allocations {
            upper += u64::from(allocation.weight);
            if bucket < upper {
                debug!(
                    "Rollout {} put subject {} in bucket {} -> {}",
                    self.flag_key, subject.key, bucket, allocation.token
                );
                return Ok(allocation.token.clone());
            }
        }
        // bucket < total_weight, so the loop always returns
        Err(FlagError::InvalidRollout(format!("bucket {} out of range", bucket)))
    }
}

// =============================================================================
// Remote flag service
// =============================================================================

#[derive(Serialize)]
struct EvaluateRequest<'a> {
    subject: &'a SubjectContext,
}

#[derive(Deserialize)]
struct EvaluateResponse {
    value: String,
}

/// Evaluates flags against a remote service:
/// `POST {endpoint}/flags/{key}/evaluate` with `{"subject": {...}}`, answered
/// by `{"value": "<token>"}`.
#[derive(Debug, Clone)]
pub struct HttpFlagEvaluator {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    timeout: Duration,
}

impl HttpFlagEvaluator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, FlagError> {
        let endpoint = endpoint.into();
        let endpoint = match reqwest::Url::parse(&endpoint) {
            Ok(url) if !url.cannot_be_a_base() => url,
            _ => return Err(FlagError::InvalidEndpoint(endpoint)),
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FlagError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// `{endpoint}/flags/{key}/evaluate`, with the key as one encoded segment
    fn evaluate_url(&self, experiment_key: &str) -> Result<reqwest::Url, FlagError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| FlagError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend(["flags", experiment_key, "evaluate"]);
        Ok(url)
    }
}

#[async_trait]
impl FlagEvaluator for HttpFlagEvaluator {
    async fn evaluate(&self, experiment_key: &str, subject: &SubjectContext) -> Result<String, FlagError> {
        let url = self.evaluate_url(experiment_key)?;
        let response = self
            .client
            .post(url)
            .json(&EvaluateRequest { subject })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FlagError::Timeout(self.timeout)
                } else {
                    FlagError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlagError::Status(status.as_u16()));
        }

        let body: EvaluateResponse = response
            .json()
            .await
            .map_err(|e| FlagError::MalformedResponse(e.to_string()))?;
        Ok(body.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rollout() -> RolloutEvaluator {
        RolloutEvaluator::new(
            "ab-testing",
            vec![
                Allocation::new("model_a", 50),
                Allocation::new("model_b", 30),
                Allocation::new("model_c", 20),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_rollout_is_deterministic_per_subject() {
        let evaluator = rollout();
        for user_id in 1..50 {
            let subject = SubjectContext::user(user_id);
            let first = evaluator.evaluate("ab-testing", &subject).await.unwrap();
            let second = evaluator.evaluate("ab-testing", &subject).await.unwrap();
            assert_eq!(first, second);
        }
    }

    #[tokio::test]
    async fn test_rollout_spreads_subjects_across_buckets() {
        let evaluator = rollout();
        let mut seen = std::collections::HashSet::new();
        for user_id in 1..500 {
            seen.insert(evaluator.evaluate("ab-testing", &SubjectContext::user(user_id)).await.unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn test_rollout_single_bucket_takes_everyone() {
        let evaluator = RolloutEvaluator::new("ab-testing", vec![Allocation::new("model_d", 1)]).unwrap();
        for user_id in 1..20 {
            let token = evaluator.evaluate("ab-testing", &SubjectContext::user(user_id)).await.unwrap();
            assert_eq!(token, "model_d");
        }
    }

    #[tokio::test]
    async fn test_rollout_rejects_other_flags() {
        let err = rollout()
            .evaluate("other-experiment", &SubjectContext::user(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FlagError::UnknownFlag(_)));
    }

    #[test]
    fn test_rollout_requires_weight() {
        let err = RolloutEvaluator::new("ab-testing", vec![Allocation::new("model_a", 0)]).unwrap_err();
        assert!(matches!(err, FlagError::InvalidRollout(_)));
    }

    #[test]
    fn test_flag_key_is_a_single_path_segment() {
        let evaluator = HttpFlagEvaluator::new("http://flags.local:8080/api/", Duration::from_secs(1)).unwrap();

        let url = evaluator.evaluate_url("ab-testing").unwrap();
        assert_eq!(url.as_str(), "http://flags.local:8080/api/flags/ab-testing/evaluate");

        let url = evaluator.evaluate_url("team/exp?v=2#x").unwrap();
        assert_eq!(url.path(), "/api/flags/team%2Fexp%3Fv=2%23x/evaluate");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_http_evaluator_rejects_bad_endpoint() {
        let err = HttpFlagEvaluator::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, FlagError::InvalidEndpoint(_)));
    }

    #[test]
    fn test_subject_context_for_user() {
        let subject = SubjectContext::user(42);
        assert_eq!(subject.key, "42");
        assert_eq!(subject.kind, "user");
    }
}
