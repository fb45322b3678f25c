//! Artifact-backed recommender.
//!
//! The training job exports a JSON artifact holding each known user's ranked
//! items and a fallback ranking (usually most-popular) for everyone else:
//!
//! ```json
//! {
//!   "dataset": "data/final_processed_data.csv",
//!   "limit": 20,
//!   "users": { "42": [2571, 318, 858] },
//!   "fallback": [2858, 260, 1196]
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use data_loader::{MovieId, UserId};

use crate::{ModelHandle, ModelMetadata, RankedItems, Recommender, RecommenderError};

/// On-disk layout of an exported model
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelArtifact {
    /// Dataset the model was trained on
    #[serde(default)]
    pub dataset: String,
    /// Maximum number of items returned per request
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub users: HashMap<UserId, Vec<MovieId>>,
    #[serde(default)]
    pub fallback: Vec<MovieId>,
}

/// Serves rankings straight out of a [`ModelArtifact`]
#[derive(Debug, Clone)]
pub struct ArtifactRecommender {
    artifact: ModelArtifact,
}

impl ArtifactRecommender {
    pub fn new(artifact: ModelArtifact) -> Self {
        Self { artifact }
    }

    /// Read and parse an artifact file
    pub fn load(path: &Path) -> Result<Self, RecommenderError> {
        let label = path.display().to_string();
        let bytes = fs::read(path).map_err(|source| RecommenderError::ArtifactIo {
            path: label.clone(),
            source,
        })?;
        let artifact: ModelArtifact =
            serde_json::from_slice(&bytes).map_err(|source| RecommenderError::ArtifactFormat {
                path: label.clone(),
                source,
            })?;

        info!(
            "Loaded model artifact {} ({} users, {} fallback items)",
            label,
            artifact.users.len(),
            artifact.fallback.len()
        );
        Ok(Self::new(artifact))
    }

    /// Load an artifact and wrap it in a [`ModelHandle`].
    ///
    /// The model version defaults to the artifact path and the data version to
    /// the artifact's `dataset` field; either can be overridden.
    pub fn load_handle(
        path: &Path,
        model_version: Option<String>,
        data_version: Option<String>,
    ) -> Result<ModelHandle, RecommenderError> {
        let recommender = Self::load(path)?;
        let metadata = ModelMetadata::new(
            model_version.unwrap_or_else(|| path.display().to_string()),
            data_version.unwrap_or_else(|| recommender.artifact.dataset.clone()),
        );
        Ok(ModelHandle::new(recommender, metadata))
    }

    pub fn dataset(&self) -> &str {
        &self.artifact.dataset
    }
}

impl Recommender for ArtifactRecommender {
    fn recommend(&self, user_id: UserId) -> Result<RankedItems, RecommenderError> {
        let ranked = match self.artifact.users.get(&user_id) {
            Some(items) => items,
            None => {
                debug!("User {} not in artifact, serving fallback ranking", user_id);
                &self.artifact.fallback
            }
        };

        let limit = self.artifact.limit.unwrap_or(ranked.len());
        let items: RankedItems = ranked.iter().take(limit).copied().collect();
        if items.is_empty() {
            return Err(RecommenderError::NoRecommendations(user_id));
        }
        Ok(items)
    }
}
