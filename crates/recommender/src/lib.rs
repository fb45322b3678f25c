//! The recommender capability consumed by the serving gateway.
//!
//! The gateway never looks inside a model. It sees a [`Recommender`] that
//! turns a user id into a ranked list of items, plus the opaque version
//! strings attached to the loaded handle ([`ModelHandle`]) that get copied
//! into provenance records.
//!
//! [`ArtifactRecommender`] is the concrete model used by deployments: a
//! precomputed artifact of per-user rankings exported by the training job.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use data_loader::{MovieId, UserId};

pub mod artifact;

pub use artifact::{ArtifactRecommender, ModelArtifact};

/// Ranked item ids, best first
pub type RankedItems = Vec<MovieId>;

/// Errors a recommender can report while loading or serving
#[derive(Error, Debug)]
pub enum RecommenderError {
    #[error("Failed to read model artifact {path}: {source}")]
    ArtifactIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid model artifact {path}: {source}")]
    ArtifactFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Model produced no recommendations for user {0}")]
    NoRecommendations(UserId),

    #[error("Model inference failed: {0}")]
    Inference(String),
}

/// Anything that can rank items for a user.
///
/// Implementations may block on computation; callers run them off the async
/// executor.
pub trait Recommender: Send + Sync {
    fn recommend(&self, user_id: UserId) -> Result<RankedItems, RecommenderError>;
}

/// Version strings describing a loaded model, recorded verbatim in provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMetadata {
    pub model_version: String,
    pub data_version: String,
}

impl ModelMetadata {
    pub fn new(model_version: impl Into<String>, data_version: impl Into<String>) -> Self {
        Self {
            model_version: model_version.into(),
            data_version: data_version.into(),
        }
    }
}

/// A loaded recommender together with its metadata.
#[derive(Clone)]
pub struct ModelHandle {
    recommender: Arc<dyn Recommender>,
    metadata: ModelMetadata,
}

impl ModelHandle {
    pub fn new(recommender: impl Recommender + 'static, metadata: ModelMetadata) -> Self {
        Self {
            recommender: Arc::new(recommender),
            metadata,
        }
    }

    /// Shared handle to the model, cheap to move onto a blocking task
    pub fn recommender(&self) -> Arc<dyn Recommender> {
        Arc::clone(&self.recommender)
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn model_version(&self) -> &str {
        &self.metadata.model_version
    }

    pub fn data_version(&self) -> &str {
        &self.metadata.data_version
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<MovieId>);

    impl Recommender for Fixed {
        fn recommend(&self, _user_id: UserId) -> Result<RankedItems, RecommenderError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_handle_exposes_metadata_and_model() {
        let handle = ModelHandle::new(
            Fixed(vec![3, 1, 2]),
            ModelMetadata::new("models/model_b.json", "data/ratings.csv"),
        );

        assert_eq!(handle.model_version(), "models/model_b.json");
        assert_eq!(handle.data_version(), "data/ratings.csv");
        assert_eq!(handle.recommender().recommend(9).unwrap(), vec![3, 1, 2]);
    }
}
