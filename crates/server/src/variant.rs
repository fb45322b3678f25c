//! Experiment variants.
//!
//! The set is closed: each variant is one branch of the A/B experiment and is
//! bound to exactly one loaded model. Which of them a process actually serves
//! is decided by the registry it was started with.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Control model, also the fallback for every assignment problem
    ModelA,
    ModelB,
    ModelC,
    ModelD,
    ModelE,
}

impl Variant {
    pub const BASELINE: Variant = Variant::ModelA;

    pub const ALL: [Variant; 5] = [
        Variant::ModelA,
        Variant::ModelB,
        Variant::ModelC,
        Variant::ModelD,
        Variant::ModelE,
    ];

    /// Label used by the flag provider and in configuration
    pub fn label(self) -> &'static str {
        match self {
            Variant::ModelA => "model_a",
            Variant::ModelB => "model_b",
            Variant::ModelC => "model_c",
            Variant::ModelD => "model_d",
            Variant::ModelE => "model_e",
        }
    }

    /// Map a flag token onto a variant. Tokens are open-ended; anything not in
    /// the closed set gives `None`.
    pub fn from_token(token: &str) -> Option<Variant> {
        Variant::ALL.into_iter().find(|v| v.label() == token)
    }

    pub fn is_baseline(self) -> bool {
        self == Variant::BASELINE
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Variant::from_token(s).ok_or_else(|| format!("unknown variant {:?}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_map_to_variants() {
        assert_eq!(Variant::from_token("model_a"), Some(Variant::ModelA));
        assert_eq!(Variant::from_token("model_e"), Some(Variant::ModelE));
        assert_eq!(Variant::from_token("model_z"), None);
        assert_eq!(Variant::from_token("MODEL_B"), None);
    }

    #[test]
    fn test_labels_match_serde_names() {
        for variant in Variant::ALL {
            let json = serde_json::to_string(&variant).unwrap();
            assert_eq!(json, format!("\"{}\"", variant.label()));
        }
        assert!(Variant::BASELINE.is_baseline());
    }
}
