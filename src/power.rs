// src/power.rs

use crate::config::{ConvergenceCheck, NumericalPolicy, DEFAULT_TOLERANCE};
use crate::error::SvdError;
use crate::job::CancellationToken;
use log::{trace, warn};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

/// A standard-normal vector of length `n`.
///
/// With a seed the vector is reproducible; without one the generator is
/// seeded from system entropy.
pub fn gaussian_vector(n: usize, seed: Option<u64>) -> Array1<f64> {
    let mut rng = match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_entropy(),
    };
    Array1::from_shape_fn(n, |_| rng.sample::<f64, _>(StandardNormal))
}

/// Outcome of one power-method run.
#[derive(Clone, Debug)]
pub struct PowerIterationResult {
    /// Final estimate of the dominant eigenvector. Unit norm unless the run
    /// hit a degenerate matrix.
    pub vector: Array1<f64>,
    pub iterations: usize,
    /// Error measure of the last iteration, as defined by the convergence check.
    pub residual: f64,
    /// False when the iteration budget ran out before the tolerance was met.
    pub converged: bool,
}

/// Power method for the dominant eigenvector of a symmetric matrix.
#[derive(Clone, Debug)]
pub struct PowerIteration {
    pub tolerance: f64,
    pub max_iterations: usize,
    pub convergence: ConvergenceCheck,
    pub numerical_policy: NumericalPolicy,
}

impl Default for PowerIteration {
    fn default() -> Self {
        PowerIteration {
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: 1000,
            convergence: ConvergenceCheck::PerIteration,
            numerical_policy: NumericalPolicy::Warn,
        }
    }
}

impl PowerIteration {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self { tolerance, max_iterations, ..Self::default() }
    }

    /// Runs without a cancellation signal.
    pub fn solve(&self, matrix: ArrayView2<f64>, v0: ArrayView1<f64>) -> Result<PowerIterationResult, SvdError> {
        self.solve_cancellable(matrix, v0, &CancellationToken::new())
    }

    /// Iterates `v <- M v / ||M v||` from `v0` until the change between
    /// successive estimates drops to the tolerance or the budget runs out.
    /// Running out of budget is not an error.
    ///
    /// # Panics
    /// Panics if `matrix` is not square or `v0` does not match its order.
    pub fn solve_cancellable(
        &self,
        matrix: ArrayView2<f64>,
        v0: ArrayView1<f64>,
        cancel: &CancellationToken,
    ) -> Result<PowerIterationResult, SvdError> {
        assert_eq!(matrix.nrows(), matrix.ncols(), "power iteration needs a square matrix");
        assert_eq!(v0.len(), matrix.nrows(), "initial vector length must match the matrix order");

        let mut v = v0.to_owned();
        let mut iterations = 0;
        let mut err = 2.0 * self.tolerance;

        while iterations < self.max_iterations && err > self.tolerance {
            cancel.check()?;

            let mut v_new = matrix.dot(&v);
            let norm = v_new.dot(&v_new).sqrt();
            if !(norm.is_finite() && norm > 0.0) {
                self.report_degenerate_norm(norm, iterations)?;
            }
            v_new /= norm;

            // Cumulative mode folds each squared difference onto the running error.
            let start = match self.convergence {
                ConvergenceCheck::PerIteration => 0.0,
                ConvergenceCheck::Cumulative => err,
            };
            err = v
                .iter()
                .zip(v_new.iter())
                .fold(start, |acc, (a, b)| {
                    let diff = a - b;
                    acc + diff * diff
                })
                .sqrt();
            v = v_new;
            iterations += 1;
            trace!("Power iteration {}: norm={:.6e}, err={:.6e}", iterations, norm, err);
        }

        // NaN never compares below the tolerance, so a NaN residual counts as not converged.
        let converged = err <= self.tolerance;
        if !converged {
            warn!(
                "Power iteration stopped after {} iterations with error {:.3e} above tolerance {:.1e}",
                iterations, err, self.tolerance
            );
        }
        Ok(PowerIterationResult { vector: v, iterations, residual: err, converged })
    }

    fn report_degenerate_norm(&self, norm: f64, iteration: usize) -> Result<(), SvdError> {
        let message = format!("norm of M*v is {} at iteration {}", norm, iteration + 1);
        match self.numerical_policy {
            NumericalPolicy::Propagate => Ok(()),
            NumericalPolicy::Warn => {
                warn!("Power iteration: {}; result will not be finite", message);
                Ok(())
            }
            NumericalPolicy::Reject => Err(SvdError::NumericalDegeneracy(format!("Power iteration: {}", message))),
        }
    }
}
