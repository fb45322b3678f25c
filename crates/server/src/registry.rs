//! Loaded models, one per deployed variant.
//!
//! Built once at startup and never mutated afterwards; the gateway shares it
//! behind an `Arc` and only ever reads from it.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::info;

use recommender::ModelHandle;

use crate::variant::Variant;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Model registry needs at least one model")]
    Empty,

    #[error("Variant {0} is configured more than once")]
    Duplicate(Variant),

    #[error("Baseline variant {} has no model", Variant::BASELINE)]
    MissingBaseline,

    #[error("No model loaded for variant {0}")]
    UnknownVariant(Variant),
}

/// Immutable variant → model table
#[derive(Debug)]
pub struct ModelRegistry {
    models: BTreeMap<Variant, ModelHandle>,
}

impl ModelRegistry {
    /// Build the registry. The baseline variant must be present and no
    /// variant may appear twice.
    pub fn new(entries: impl IntoIterator<Item = (Variant, ModelHandle)>) -> Result<Self, RegistryError> {
        let mut models = BTreeMap::new();
        for (variant, handle) in entries {
            if models.insert(variant, handle).is_some() {
                return Err(RegistryError::Duplicate(variant));
            }
        }

        if models.is_empty() {
            return Err(RegistryError::Empty);
        }
        if !models.contains_key(&Variant::BASELINE) {
            return Err(RegistryError::MissingBaseline);
        }

        for (variant, handle) in &models {
            info!(
                "Registered {} -> model_version={} data_version={}",
                variant,
                handle.model_version(),
                handle.data_version()
            );
        }
        Ok(Self { models })
    }

    pub fn resolve(&self, variant: Variant) -> Result<&ModelHandle, RegistryError> {
        self.models
            .get(&variant)
            .ok_or(RegistryError::UnknownVariant(variant))
    }

    pub fn contains(&self, variant: Variant) -> bool {
        self.models.contains_key(&variant)
    }

    /// Deployed variants in label order
    pub fn variants(&self) -> impl Iterator<Item = Variant> + '_ {
        self.models.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
