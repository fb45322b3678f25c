//! # Data Loader Crate
//!
//! Data contracts shared by the serving gateway and the offline fairness audit.
//!
//! ## Main Components
//!
//! - **types**: ids, genres, the movie [`Catalog`] and per-user [`RatingCounts`]
//! - **parser**: ratings tables and MovieLens `movies.dat`
//! - **records**: [`ProvenanceRecord`] and [`ExposureLogEntry`] JSON Lines formats
//! - **exposure**: selecting and streaming exposure-log files
//! - **error**: error types for data loading
//!
//! ## Example Usage
//!
//! ```ignore
//! use data_loader::{parse_rating_counts, read_exposure_log, resolve_log_sources};
//! use std::path::Path;
//!
//! let counts = parse_rating_counts(Path::new("data/final_processed_data.csv"))?;
//! for path in resolve_log_sources(&["logs/recs_2025-05-06*.jsonl"])? {
//!     let stats = read_exposure_log(&path, |entry| {
//!         println!("user {} ({} ratings) saw {:?}", entry.user_id, counts.get(entry.user_id), entry.genres);
//!     })?;
//!     println!("{} entries, {} skipped", stats.entries, stats.skipped);
//! }
//! ```

pub mod error;
pub mod exposure;
pub mod parser;
pub mod records;
pub mod types;

pub use error::{DataLoadError, Result};
pub use exposure::{ExposureLogStats, read_exposure_log, resolve_log_sources};
pub use parser::{parse_catalog, parse_rating_counts};
pub use records::{ExposureLogEntry, ProvenanceRecord};
pub use types::{Catalog, Genre, Movie, MovieId, RatingCounts, UserId};
