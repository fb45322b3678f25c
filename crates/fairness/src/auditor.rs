//! # Exposure Fairness Auditor
//!
//! Compares the genres shown to light users (few historical ratings) with the
//! genres shown to everyone:
//! 1. Count rating rows per user; a user is light iff count <= threshold
//! 2. Count genre occurrences over all exposure entries (global) and over the
//!    entries of light users (light); repeats inside an entry count each time
//! 3. Normalise both counters into probability distributions
//! 4. Sum `p * ln(p / q)` over the genres of the light distribution, with `q`
//!    the global probability or [`MISSING_GENRE_PROBABILITY`] when absent
//!
//! Genres seen only in the global distribution contribute nothing, so the
//! result measures how far the light users' exposure strays from the global
//! one on the light users' own support.
//!
//! Counters are ordered maps of integers. Merging per-file tallies is
//! commutative and the final floating-point sum always runs in genre order,
//! so the result does not depend on how log entries were processed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use data_loader::{
    ExposureLogEntry, ExposureLogStats, RatingCounts, UserId, parse_rating_counts,
    read_exposure_log,
};

use crate::error::{AuditError, Result};

/// Default light-user rating threshold
pub const DEFAULT_LIGHT_THRESHOLD: u32 = 5;

/// Stand-in global probability for a genre only light users were shown
pub const MISSING_GENRE_PROBABILITY: f64 = 1e-12;

// =============================================================================
// Light-user classification
// =============================================================================

/// Fixed light-user rule for one audit run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightUserPolicy {
    threshold: u32,
}

impl LightUserPolicy {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_light(&self, rating_count: u32) -> bool {
        rating_count <= self.threshold
    }
}

impl Default for LightUserPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_LIGHT_THRESHOLD)
    }
}

// =============================================================================
// Counters and distributions
// =============================================================================

/// Genre occurrence counter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenreCounter {
    counts: BTreeMap<String, u64>,
    total: u64,
}

impl GenreCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, genre: &str) {
        *self.counts.entry(genre.to_string()).or_insert(0) += 1;
        self.total += 1;
    }

    pub fn get(&self, genre: &str) -> u64 {
        self.counts.get(genre).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn merge(mut self, other: GenreCounter) -> Self {
        for (genre, count) in other.counts {
            *self.counts.entry(genre).or_insert(0) += count;
        }
        self.total += other.total;
        self
    }

    /// Normalise into probabilities. An empty counter gives an empty
    /// distribution.
    pub fn to_distribution(&self) -> ExposureDistribution {
        let total = self.total as f64;
        let probabilities = self
            .counts
            .iter()
            .map(|(genre, &count)| (genre.clone(), count as f64 / total))
            .collect();
        ExposureDistribution { probabilities }
    }
}

/// Genre → probability
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExposureDistribution {
    probabilities: BTreeMap<String, f64>,
}

impl ExposureDistribution {
    pub fn get(&self, genre: &str) -> Option<f64> {
        self.probabilities.get(genre).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.probabilities.iter().map(|(g, &p)| (g.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }
}

/// Smoothed KL divergence restricted to the support of `light`.
///
/// An empty `light` distribution yields 0.
pub fn kl_divergence(light: &ExposureDistribution, global: &ExposureDistribution) -> f64 {
    light
        .iter()
        .map(|(genre, p)| {
            let q = global.get(genre).unwrap_or(MISSING_GENRE_PROBABILITY);
            p * (p / q).ln()
        })
        .fold(0.0, |acc, term| acc + term)
}

// =============================================================================
// Tallies
// =============================================================================

/// Exposure counts for one log source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub path: PathBuf,
    pub stats: ExposureLogStats,
}

/// Everything counted so far in an audit run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExposureTally {
    pub global: GenreCounter,
    pub light: GenreCounter,
    /// Entries observed
    pub entries: u64,
    /// Entries that belonged to light users
    pub light_entries: u64,
    pub sources: Vec<SourceSummary>,
}

impl ExposureTally {
    pub fn merge(mut self, other: ExposureTally) -> Self {
        self.global = self.global.merge(other.global);
        self.light = self.light.merge(other.light);
        self.entries += other.entries;
        self.light_entries += other.light_entries;
        self.sources.extend(other.sources);
        self.sources.sort_by(|a, b| a.path.cmp(&b.path));
        self
    }

    /// Malformed entries skipped across all sources
    pub fn skipped(&self) -> u64 {
        self.sources.iter().map(|s| s.stats.skipped).sum()
    }
}

// =============================================================================
// Auditor
// =============================================================================

/// Result of one audit run
#[derive(Debug, Clone)]
pub struct AuditReport {
    pub divergence: f64,
    pub light: ExposureDistribution,
    pub global: ExposureDistribution,
    pub tally: ExposureTally,
    pub threshold: u32,
}

impl AuditReport {
    /// The one-line result: `KL(light || global) = 0.223`
    pub fn summary_line(&self) -> String {
        format!("KL(light || global) = {:.3}", self.divergence)
    }

    pub fn skipped(&self) -> u64 {
        self.tally.skipped()
    }
}

/// Offline exposure auditor. The rating counts and the light-user policy are
/// fixed at construction and cannot change during a run.
#[derive(Debug, Clone)]
pub struct FairnessAuditor {
    ratings: RatingCounts,
    policy: LightUserPolicy,
}

impl FairnessAuditor {
    pub fn new(ratings: RatingCounts, policy: LightUserPolicy) -> Self {
        Self { ratings, policy }
    }

    /// Build an auditor from a ratings dataset on disk
    pub fn from_dataset(path: &Path, policy: LightUserPolicy) -> Result<Self> {
        let ratings = parse_rating_counts(path)?;
        info!(
            "Loaded ratings for {} users ({} rows) from {}",
            ratings.users(),
            ratings.total(),
            path.display()
        );
        Ok(Self::new(ratings, policy))
    }

    pub fn policy(&self) -> LightUserPolicy {
        self.policy
    }

    pub fn is_light(&self, user_id: UserId) -> bool {
        self.policy.is_light(self.ratings.get(user_id))
    }

    /// Add one exposure entry to `tally`
    pub fn observe(&self, tally: &mut ExposureTally, entry: &ExposureLogEntry) {
        let light = self.is_light(entry.user_id);
        for genre in &entry.genres {
            tally.global.add(genre);
            if light {
                tally.light.add(genre);
            }
        }
        tally.entries += 1;
        if light {
            tally.light_entries += 1;
        }
    }

    /// Count an in-memory set of entries
    pub fn tally_entries<'a, I>(&self, entries: I) -> ExposureTally
    where
        I: IntoIterator<Item = &'a ExposureLogEntry>,
    {
        let mut tally = ExposureTally::default();
        for entry in entries {
            self.observe(&mut tally, entry);
        }
        tally
    }

    /// Count every entry of every log file, one file per rayon task
    pub fn tally_sources(&self, paths: &[PathBuf]) -> Result<ExposureTally> {
        paths
            .par_iter()
            .map(|path| -> Result<ExposureTally> {
                let mut tally = ExposureTally::default();
                let stats = read_exposure_log(path, |entry| self.observe(&mut tally, &entry))?;
                if stats.skipped > 0 {
                    warn!(
                        "Skipped {} malformed exposure entries in {}",
                        stats.skipped,
                        path.display()
                    );
                }
                tally.sources.push(SourceSummary {
                    path: path.clone(),
                    stats,
                });
                Ok(tally)
            })
            .try_reduce(ExposureTally::default, |a, b| Ok(a.merge(b)))
    }

    /// Turn a finished tally into a report.
    ///
    /// Fails with [`AuditError::EmptyGlobalDistribution`] when nothing at all
    /// was exposed.
    pub fn report(&self, tally: ExposureTally) -> Result<AuditReport> {
        if tally.global.is_empty() {
            return Err(AuditError::EmptyGlobalDistribution);
        }

        let global = tally.global.to_distribution();
        let light = tally.light.to_distribution();
        let divergence = kl_divergence(&light, &global);

        info!(
            "Audited {} entries ({} from light users, {} skipped): global exposures={}, light exposures={}, divergence={:.6}",
            tally.entries,
            tally.light_entries,
            tally.skipped(),
            tally.global.total(),
            tally.light.total(),
            divergence
        );

        Ok(AuditReport {
            divergence,
            light,
            global,
            tally,
            threshold: self.policy.threshold(),
        })
    }

    /// Count `paths` and report
    pub fn audit_sources(&self, paths: &[PathBuf]) -> Result<AuditReport> {
        let tally = self.tally_sources(paths)?;
        self.report(tally)
    }
}
