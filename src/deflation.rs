// src/deflation.rs

use crate::config::SeedPolicy;
use crate::error::SvdError;
use crate::job::CancellationToken;
use crate::power::{gaussian_vector, PowerIteration, PowerIterationResult};
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Running projector `P = I - sum_i v_i v_i'` over the right singular
/// vectors found so far.
///
/// `P` maps any vector onto the orthogonal complement of the found vectors,
/// so `P G P` is the Gram matrix of the residual data `A P`.
#[derive(Clone, Debug)]
pub struct Projector {
    matrix: Array2<f64>,
}

impl Projector {
    pub fn identity(n: usize) -> Self {
        Self { matrix: Array2::eye(n) }
    }

    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    /// `P <- P - v v'`. Only the lower triangle is computed; the upper
    /// triangle is mirrored from it so `P` stays exactly symmetric.
    pub fn subtract_outer(&mut self, v: ArrayView1<f64>) {
        assert_eq!(v.len(), self.dim(), "vector length must match the projector order");
        for i in 0..v.len() {
            for j in 0..i {
                let value = self.matrix[[i, j]] - v[i] * v[j];
                self.matrix[[i, j]] = value;
                self.matrix[[j, i]] = value;
            }
            self.matrix[[i, i]] -= v[i] * v[i];
        }
    }

    /// `P v`.
    pub fn apply(&self, v: ArrayView1<f64>) -> Array1<f64> {
        self.matrix.dot(&v)
    }

    /// `P G P`, the Gram matrix with the found directions removed.
    pub fn deflate(&self, gram: ArrayView2<f64>) -> Array2<f64> {
        self.matrix.dot(&gram).dot(&self.matrix)
    }
}

/// One extracted right singular vector.
#[derive(Clone, Debug)]
pub struct DeflationRound {
    /// Zero-based round index.
    pub index: usize,
    /// `v_k`, the dominant eigenvector of the deflated Gram matrix.
    pub vector: Array1<f64>,
    /// `P_{k-1} v_k`, computed with the projector in force before this
    /// round's update. Multiplying a data row by it gives the row of
    /// `A_{k-1} v_k`.
    pub pass_vector: Array1<f64>,
    pub iterations: usize,
    pub residual: f64,
    pub converged: bool,
}

/// Extracts right singular vectors one at a time by Hotelling deflation.
///
/// Round 1 runs the power method on `G`. After each round the projector
/// drops the found vector and the next round runs on `P G P`. The deflated
/// matrix is only built when another round follows.
pub struct DeflationController<'a> {
    gram: ArrayView2<'a, f64>,
    current: Array2<f64>,
    projector: Projector,
    solver: PowerIteration,
    base_seed: u64,
    seed_policy: SeedPolicy,
    rounds_done: usize,
    total_rounds: usize,
}

impl<'a> DeflationController<'a> {
    pub fn new(
        gram: ArrayView2<'a, f64>,
        total_rounds: usize,
        solver: PowerIteration,
        base_seed: u64,
        seed_policy: SeedPolicy,
    ) -> Self {
        assert_eq!(gram.nrows(), gram.ncols(), "Gram matrix must be square");
        Self {
            gram,
            current: gram.to_owned(),
            projector: Projector::identity(gram.nrows()),
            solver,
            base_seed,
            seed_policy,
            rounds_done: 0,
            total_rounds,
        }
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    pub fn rounds_done(&self) -> usize {
        self.rounds_done
    }

    fn round_seed(&self, round: usize) -> u64 {
        self.seed_policy.seed_for_round(self.base_seed, round)
    }

    /// Runs the next round. Returns `None` once all rounds are done.
    pub fn next_round(&mut self, cancel: &CancellationToken) -> Result<Option<DeflationRound>, SvdError> {
        if self.rounds_done >= self.total_rounds {
            return Ok(None);
        }
        cancel.check()?;
        let index = self.rounds_done;
        let v0 = gaussian_vector(self.gram.nrows(), Some(self.round_seed(index)));
        let PowerIterationResult { vector, iterations, residual, converged } =
            self.solver.solve_cancellable(self.current.view(), v0.view(), cancel)?;
        debug!(
            "Deflation round {}: {} power iterations, residual {:.3e}, converged={}",
            index + 1,
            iterations,
            residual,
            converged
        );

        let pass_vector = self.projector.apply(vector.view());
        self.projector.subtract_outer(vector.view());
        self.rounds_done += 1;
        if self.rounds_done < self.total_rounds {
            self.current = self.projector.deflate(self.gram);
        }

        Ok(Some(DeflationRound { index, vector, pass_vector, iterations, residual, converged }))
    }
}
