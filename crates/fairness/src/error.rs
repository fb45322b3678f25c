//! Error types for the fairness audit.

use thiserror::Error;

use data_loader::DataLoadError;

#[derive(Error, Debug)]
pub enum AuditError {
    /// No genre exposures at all were observed, so the global distribution
    /// is undefined.
    #[error("Global exposure distribution is empty: no genre exposures in the selected logs")]
    EmptyGlobalDistribution,

    /// The ratings dataset or a log source could not be read
    #[error(transparent)]
    Load(#[from] DataLoadError),
}

pub type Result<T> = std::result::Result<T, AuditError>;
