//! Experiment assignment.
//!
//! Turns a user id into the variant that serves the request. The flag
//! provider decides; the assignor only normalises its answer so that the
//! result is always a variant the registry has loaded. Every problem
//! (provider error, timeout, unknown token, variant not deployed) degrades to
//! the baseline variant and is logged, never returned.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use data_loader::UserId;

use crate::flags::{FlagError, FlagEvaluator, SubjectContext};
use crate::registry::ModelRegistry;
use crate::variant::Variant;

/// Default bound on a single flag evaluation
pub const DEFAULT_EVALUATION_TIMEOUT: Duration = Duration::from_millis(250);

/// Why an assignment fell back to the baseline variant
#[derive(Debug)]
pub enum FallbackReason {
    /// The provider answered with a token outside the variant set
    UnknownToken(String),
    /// The token names a variant this process has no model for
    NotDeployed(Variant),
    /// The provider failed
    Provider(FlagError),
    /// The provider did not answer within the bound
    Timeout(Duration),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::UnknownToken(token) => write!(f, "unknown variation token {:?}", token),
            FallbackReason::NotDeployed(variant) => write!(f, "variant {} is not deployed", variant),
            FallbackReason::Provider(e) => write!(f, "flag provider error: {}", e),
            FallbackReason::Timeout(after) => write!(f, "flag evaluation timed out after {:?}", after),
        }
    }
}

/// Outcome of one assignment
#[derive(Debug)]
pub struct Assignment {
    pub variant: Variant,
    /// Raw token returned by the provider, if it answered
    pub token: Option<String>,
    /// Set when `variant` is the baseline because something went wrong
    pub fallback: Option<FallbackReason>,
}

impl Assignment {
    fn assigned(variant: Variant, token: String) -> Self {
        Self {
            variant,
            token: Some(token),
            fallback: None,
        }
    }

    fn fallback(token: Option<String>, reason: FallbackReason) -> Self {
        Self {
            variant: Variant::BASELINE,
            token,
            fallback: Some(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Resolves users to deployed variants through a flag provider.
///
/// Holds no per-request state: the result depends only on the inputs and the
/// provider's configuration.
pub struct ExperimentAssignor {
    evaluator: Arc<dyn FlagEvaluator>,
    deployed: BTreeSet<Variant>,
    timeout: Duration,
}

impl ExperimentAssignor {
    /// # Arguments
    /// * `evaluator` - Flag provider
    /// * `deployed` - Variants that have a loaded model; must include the baseline
    /// * `timeout` - Upper bound on one evaluation
    pub fn new(
        evaluator: Arc<dyn FlagEvaluator>,
        deployed: impl IntoIterator<Item = Variant>,
        timeout: Duration,
    ) -> Self {
        let mut deployed: BTreeSet<Variant> = deployed.into_iter().collect();
        deployed.insert(Variant::BASELINE);
        Self {
            evaluator,
            deployed,
            timeout,
        }
    }

    /// Assignor restricted to the variants loaded in `registry`
    pub fn for_registry(evaluator: Arc<dyn FlagEvaluator>, registry: &ModelRegistry, timeout: Duration) -> Self {
        Self::new(evaluator, registry.variants(), timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Variant for `user_id` in `experiment_key`
    pub async fn assign(&self, experiment_key: &str, user_id: UserId) -> Variant {
        self.assign_detailed(experiment_key, user_id).await.variant
    }

    /// Like [`assign`](Self::assign), keeping the provider token and any
    /// fallback reason.
    pub async fn assign_detailed(&self, experiment_key: &str, user_id: UserId) -> Assignment {
        let subject = SubjectContext::user(user_id);
        let evaluation = tokio::time::timeout(
            self.timeout,
            self.evaluator.evaluate(experiment_key, &subject),
        )
        .await;

        let assignment = match evaluation {
            Err(_) => Assignment::fallback(None, FallbackReason::Timeout(self.timeout)),
            Ok(Err(e)) => Assignment::fallback(None, FallbackReason::Provider(e)),
            Ok(Ok(token)) => match Variant::from_token(&token) {
                None => {
                    let reason = FallbackReason::UnknownToken(token.clone());
                    Assignment::fallback(Some(token), reason)
                }
                Some(variant) if !self.deployed.contains(&variant) => {
                    Assignment::fallback(Some(token), FallbackReason::NotDeployed(variant))
                }
                Some(variant) => Assignment::assigned(variant, token),
            },
        };

        match &assignment.fallback {
            Some(reason) => warn!(
                "Experiment {} fell back to {} for user {}: {}",
                experiment_key,
                Variant::BASELINE,
                user_id,
                reason
            ),
            None => debug!(
                "Experiment {} assigned {} to user {}",
                experiment_key, assignment.variant, user_id
            ),
        }

        assignment
    }
}
