// src/error.rs

use std::error::Error;
use thiserror::Error;

/// A thread-safe wrapper for standard dynamic errors,
/// so they implement `Send` and `Sync`.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Errors produced while building an SVD model.
#[derive(Error, Debug)]
pub enum SvdError {
    /// Every problem found while checking the configuration against the data.
    /// Raised before any partition is read.
    #[error("Found validation errors: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The job was cancelled by its owner. Partial output has been discarded.
    #[error("SVD computation was cancelled")]
    Cancelled,

    /// Only raised under `NumericalPolicy::Reject`.
    #[error("Numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    /// A partition could not be read from the underlying data source.
    #[error("Failed to read partition {partition}: {source}")]
    Data {
        partition: usize,
        #[source]
        source: ThreadSafeStdError,
    },

    /// A store key is already held by another job.
    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SvdError {
    /// True for the distinguished cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SvdError::Cancelled)
    }
}
