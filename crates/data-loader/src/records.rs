//! Persisted record formats.
//!
//! Both record kinds are written as JSON Lines, one self-contained object per
//! line. [`ProvenanceRecord`] is produced by the gateway for every served
//! request; [`ExposureLogEntry`] is what the fairness audit consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Immutable audit entry describing one serving decision.
///
/// `count` is not stored: it is derived from `recommendations` when the
/// record is serialized and checked against it when a record is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ProvenanceWire", try_from = "ProvenanceWire")]
pub struct ProvenanceRecord {
    timestamp: DateTime<Utc>,
    user_id: UserId,
    model_version: String,
    data_version: String,
    recommendations: Vec<String>,
}

impl ProvenanceRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        user_id: UserId,
        model_version: impl Into<String>,
        data_version: impl Into<String>,
        recommendations: Vec<String>,
    ) -> Self {
        Self {
            timestamp,
            user_id,
            model_version: model_version.into(),
            data_version: data_version.into(),
            recommendations,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn data_version(&self) -> &str {
        &self.data_version
    }

    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }

    pub fn count(&self) -> usize {
        self.recommendations.len()
    }

    /// Serialize as one JSON line (without the trailing newline)
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvenanceWire {
    timestamp: DateTime<Utc>,
    user_id: UserId,
    model_version: String,
    data_version: String,
    recommendations: Vec<String>,
    count: usize,
}

impl From<ProvenanceRecord> for ProvenanceWire {
    fn from(record: ProvenanceRecord) -> Self {
        let count = record.recommendations.len();
        Self {
            timestamp: record.timestamp,
            user_id: record.user_id,
            model_version: record.model_version,
            data_version: record.data_version,
            recommendations: record.recommendations,
            count,
        }
    }
}

impl TryFrom<ProvenanceWire> for ProvenanceRecord {
    type Error = String;

    fn try_from(wire: ProvenanceWire) -> Result<Self, Self::Error> {
        if wire.count != wire.recommendations.len() {
            return Err(format!(
                "count {} does not match {} recommendations",
                wire.count,
                wire.recommendations.len()
            ));
        }
        Ok(Self {
            timestamp: wire.timestamp,
            user_id: wire.user_id,
            model_version: wire.model_version,
            data_version: wire.data_version,
            recommendations: wire.recommendations,
        })
    }
}

/// Genres shown to one user by one served request.
///
/// Genres may repeat (two action movies in one response are two exposures).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureLogEntry {
    #[serde(rename = "userId", alias = "user_id")]
    pub user_id: UserId,
    pub genres: Vec<String>,
}

impl ExposureLogEntry {
    pub fn new(user_id: UserId, genres: Vec<String>) -> Self {
        Self { user_id, genres }
    }
}
