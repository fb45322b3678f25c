//! Error types for the data-loader crate.
//!
//! Every loader in this crate reports failures through [`DataLoadError`].
//! Per-line problems inside exposure logs are not errors at all: those lines
//! are skipped and counted by the exposure reader instead.

use thiserror::Error;

/// Errors that can occur while loading datasets, catalogs and log sources
#[derive(Error, Debug)]
pub enum DataLoadError {
    /// File could not be found or opened
    #[error("Failed to open file: {path}")]
    FileNotFound { path: String },

    /// I/O error occurred while reading or writing a file
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Line in a data file couldn't be parsed
    #[error("Parse error at line {line} in {file}: {reason}")]
    ParseError {
        file: String,
        line: usize,
        reason: String,
    },

    /// A data field had an invalid value
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// The ratings table has no recognisable user column
    #[error("No user id column in {file} (expected one of {expected})")]
    MissingColumn { file: String, expected: String },

    /// A log-source selector is not a valid glob pattern
    #[error("Invalid log source pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A selector matched nothing on disk
    #[error("No log sources matched {0}")]
    NoSources(String),
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, DataLoadError>;
