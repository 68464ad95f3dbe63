// src/config.rs

use crate::error::SvdError;
use crate::transform::TransformPolicy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Convergence tolerance on the change of the power-iteration estimate.
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// How the power method measures the change between successive estimates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceCheck {
    /// The squared error is reset every iteration, so the check compares
    /// `||v_prev - v_new||` against the tolerance.
    #[default]
    PerIteration,
    /// The error carries over between iterations: it starts at twice the
    /// tolerance, each squared difference is added onto it in element order,
    /// and the sum's square root becomes the new error. Reproduces older
    /// model builds bit for bit.
    Cumulative,
}

/// Initial-vector seeding across deflation rounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedPolicy {
    /// Every round starts from the vector drawn with the same seed.
    #[default]
    SameEveryRound,
    /// Round `k` (zero based) uses `seed + k`.
    OffsetByRound,
}

impl SeedPolicy {
    /// Seed of the initial vector in round `round` (zero based), given the
    /// seed resolved for the whole build.
    pub fn seed_for_round(self, base_seed: u64, round: usize) -> u64 {
        match self {
            SeedPolicy::SameEveryRound => base_seed,
            SeedPolicy::OffsetByRound => base_seed.wrapping_add(round as u64),
        }
    }
}

/// What to do when the computation hits a zero or non-finite quantity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericalPolicy {
    /// Silent propagation; NaN and infinities flow into the results.
    Propagate,
    /// Same results as `Propagate`, with a `warn!` for each occurrence.
    #[default]
    Warn,
    /// Abort with `SvdError::NumericalDegeneracy`.
    Reject,
}

/// Parameters of an SVD model build.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SvdConfig {
    /// Number of right singular vectors to compute. Must lie in `1..=n_cols`.
    pub nv: usize,
    /// Iteration budget of every power-method run. Must be at least 1.
    pub max_iterations: usize,
    /// Column normalization applied to every row read.
    pub transform: TransformPolicy,
    /// Skip singular values and left singular vectors entirely.
    pub only_v: bool,
    /// Derive PCA tables from the singular values and vectors.
    pub recover_pca: bool,
    /// Seed of the initial random vector. `None` draws one seed per build.
    pub seed: Option<u64>,
    pub tolerance: f64,
    pub convergence: ConvergenceCheck,
    pub seed_policy: SeedPolicy,
    /// Divide the previous U column inside the next singular-value pass
    /// instead of running a dedicated pass for it.
    pub fuse_normalization: bool,
    pub numerical_policy: NumericalPolicy,
    /// Store key of the left singular vectors. Generated when `None`.
    pub u_key: Option<String>,
}

impl Default for SvdConfig {
    fn default() -> Self {
        SvdConfig {
            nv: 1,
            max_iterations: 1000,
            transform: TransformPolicy::None,
            only_v: false,
            recover_pca: false,
            seed: None,
            tolerance: DEFAULT_TOLERANCE,
            convergence: ConvergenceCheck::PerIteration,
            seed_policy: SeedPolicy::SameEveryRound,
            fuse_normalization: true,
            numerical_policy: NumericalPolicy::Warn,
            u_key: None,
        }
    }
}

impl SvdConfig {
    /// Checks the parameters that do not depend on the data.
    /// Returns every problem found, not just the first one.
    pub fn parameter_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_iterations < 1 {
            errors.push("max_iterations must be at least 1".to_string());
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            errors.push(format!(
                "tolerance must be a positive finite number, got {}",
                self.tolerance
            ));
        }
        if let Some(key) = &self.u_key {
            if key.trim().is_empty() {
                errors.push("u_key must not be blank".to_string());
            }
        }
        errors
    }

    /// Checks the parameters against a dataset of `n_cols` columns.
    pub fn validate(&self, n_cols: usize) -> Result<(), SvdError> {
        let mut errors = self.parameter_errors();
        if self.nv < 1 || self.nv > n_cols {
            errors.push(format!(
                "Number of right singular values must be between 1 and {}",
                n_cols
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SvdError::Validation(errors))
        }
    }

    /// The U key for this build, generating one when none was configured.
    pub fn resolve_u_key(&self) -> String {
        match &self.u_key {
            Some(key) => key.clone(),
            None => format!("SVDUMatrix_{:016x}", rand::thread_rng().gen::<u64>()),
        }
    }

    /// Reads a configuration from a JSON file. Missing fields take their
    /// default values.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, SvdError> {
        let file = File::open(path.as_ref())?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            SvdError::Persistence(format!(
                "Failed to parse SVD config at {:?}: {}",
                path.as_ref(),
                e
            ))
        })
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SvdError> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| SvdError::Persistence(format!("Failed to write SVD config: {}", e)))
    }
}
