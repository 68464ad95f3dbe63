// Truncated singular value decomposition by power iteration

#![doc = include_str!("../README.md")]

pub mod config;
pub mod deflation;
pub mod diagnostics;
pub mod error;
pub mod frame;
pub mod gram;
pub mod job;
pub mod left_vectors;
pub mod model;
pub mod output;
pub mod power;
pub mod store;
pub mod svd;
pub mod transform;

#[cfg(test)]
mod svd_tests;

pub use config::{ConvergenceCheck, NumericalPolicy, SeedPolicy, SvdConfig};
pub use error::{SvdError, ThreadSafeStdError};
pub use frame::{ColumnKind, InMemoryFrame, PartitionedMatrix};
pub use job::{CancellationToken, JobStatus, SvdJob};
pub use left_vectors::LeftSingularVectors;
pub use model::{SvdModel, SvdOutput};
pub use output::{ComponentTable, PcaSummary};
pub use store::{InMemoryStore, ModelStore, StoredValue};
pub use svd::{PowerSvd, SvdFit};
pub use transform::{Normalization, TransformPolicy};
