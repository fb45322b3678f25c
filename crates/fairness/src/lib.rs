//! Offline exposure-fairness audit.
//!
//! Reads a ratings dataset and a set of exposure logs written by the gateway
//! and reports how far light users' genre exposure diverges from the global
//! exposure distribution.
//!
//! ## Example Usage
//! ```ignore
//! use data_loader::resolve_log_sources;
//! use fairness::{FairnessAuditor, LightUserPolicy};
//!
//! let auditor = FairnessAuditor::from_dataset(
//!     Path::new("data/final_processed_data.csv"),
//!     LightUserPolicy::default(),
//! )?;
//! let sources = resolve_log_sources(&["logs/recs_2025-05-06*.jsonl"])?;
//! let report = auditor.audit_sources(&sources)?;
//! println!("{}", report.summary_line());
//! ```

pub mod auditor;
pub mod error;

pub use auditor::{
    AuditReport, DEFAULT_LIGHT_THRESHOLD, ExposureDistribution, ExposureTally, FairnessAuditor,
    GenreCounter, LightUserPolicy, MISSING_GENRE_PROBABILITY, SourceSummary, kl_divergence,
};
pub use error::{AuditError, Result};
