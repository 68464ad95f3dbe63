// src/svd.rs

use crate::config::{NumericalPolicy, SvdConfig};
use crate::deflation::DeflationController;
use crate::diagnostics::{compute_frob_norm, compute_orthogonality_error, RoundDiagnostics, SvdRunDiagnostics};
use crate::error::SvdError;
use crate::frame::{ColumnKind, PartitionedMatrix};
use crate::gram::{Gram, GramBuilder};
use crate::job::CancellationToken;
use crate::left_vectors::{LeftSingularVectors, SingularValuePass};
use crate::model::{SvdModel, SvdOutput};
use crate::output::{assemble_v, PcaSummary};
use crate::power::PowerIteration;
use crate::transform::Normalization;
use log::{debug, info, warn};
use ndarray::Array1;
use rand::Rng;
use std::time::Instant;

/// A fitted model together with its left singular vectors, before publication.
#[derive(Debug)]
pub struct SvdFit {
    pub model: SvdModel,
    /// Absent when only `V` was requested.
    pub left_singular_vectors: Option<LeftSingularVectors>,
}

/// Truncated SVD by power iteration on a deflating Gram matrix.
///
/// The build makes one pass over the data for normalization statistics (when
/// the transform needs them), one pass for the Gram matrix, and one pass per
/// singular value. Every pass is parallel over partitions.
#[derive(Clone, Debug, Default)]
pub struct PowerSvd {
    config: SvdConfig,
}

impl PowerSvd {
    pub fn new(config: SvdConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SvdConfig {
        &self.config
    }

    /// Checks the configuration against `data` without reading any partition.
    /// Every problem is reported in one `SvdError::Validation`.
    pub fn validate<M: PartitionedMatrix + ?Sized>(&self, data: &M) -> Result<(), SvdError> {
        let n_cols = data.num_cols();
        let mut errors = match self.config.validate(n_cols) {
            Ok(()) => Vec::new(),
            Err(SvdError::Validation(errors)) => errors,
            Err(other) => return Err(other),
        };
        if n_cols == 0 {
            errors.push("Training frame must have at least one column".to_string());
        }
        if data.column_kinds().iter().any(|k| *k != ColumnKind::Numeric) {
            errors.push("Training frame must contain all numeric data".to_string());
        }
        if data.num_rows() == 0 {
            errors.push("Training frame must have at least one row".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SvdError::Validation(errors))
        }
    }

    pub fn fit<M: PartitionedMatrix + ?Sized>(&self, data: &M) -> Result<SvdFit, SvdError> {
        self.fit_cancellable(data, &CancellationToken::new())
    }

    /// Runs the full build. On cancellation every partial result, including
    /// the partially filled `U`, is dropped and `SvdError::Cancelled` returned.
    pub fn fit_cancellable<M: PartitionedMatrix + ?Sized>(
        &self,
        data: &M,
        cancel: &CancellationToken,
    ) -> Result<SvdFit, SvdError> {
        let overall_start = Instant::now();
        self.validate(data)?;
        let config = &self.config;
        let n_rows = data.num_rows();
        let n_cols = data.num_cols();
        let nv = config.nv;
        info!(
            "Starting SVD: {} rows x {} columns in {} partitions, nv={}, transform={:?}, only_v={}",
            n_rows,
            n_cols,
            data.num_partitions(),
            nv,
            config.transform,
            config.only_v
        );

        let normalization = Normalization::compute(data, config.transform)?;
        cancel.check()?;

        let gram = GramBuilder::new(&normalization, cancel).build(data)?;
        check_gram(&gram, config.numerical_policy)?;
        let gram_fro_norm = compute_frob_norm(&gram.matrix.view());
        let mut notes = Vec::new();
        if gram.rows_skipped > 0 {
            notes.push(format!(
                "Gram matrix skipped {} of {} rows with missing values",
                gram.rows_skipped, n_rows
            ));
        }

        let base_seed = match config.seed {
            Some(seed) => seed,
            None => {
                let seed = rand::thread_rng().gen::<u64>();
                info!("No seed configured; drew seed {} for this build", seed);
                seed
            }
        };

        let solver = PowerIteration {
            tolerance: config.tolerance,
            max_iterations: config.max_iterations,
            convergence: config.convergence,
            numerical_policy: config.numerical_policy,
        };
        let mut controller = DeflationController::new(gram.matrix.view(), nv, solver, base_seed, config.seed_policy);
        let mut u = if config.only_v {
            None
        } else {
            Some(LeftSingularVectors::zeros(config.resolve_u_key(), data, nv))
        };
        let pass = SingularValuePass::new(&normalization, config.numerical_policy, cancel);

        let mut vectors: Vec<Array1<f64>> = Vec::with_capacity(nv);
        let mut sigmas: Vec<f64> = Vec::with_capacity(if config.only_v { 0 } else { nv });
        let mut rounds: Vec<RoundDiagnostics> = Vec::with_capacity(nv);

        loop {
            let round_start = Instant::now();
            let round = match controller.next_round(cancel)? {
                Some(round) => round,
                None => break,
            };
            let k = round.index;

            let singular_value = match u.as_mut() {
                Some(u) => {
                    let previous = if k > 0 { Some(sigmas[k - 1]) } else { None };
                    let fused = previous.filter(|_| config.fuse_normalization);
                    let sigma = pass.run(data, u, k, round.pass_vector.view(), fused)?;
                    if let (Some(prev), false) = (previous, config.fuse_normalization) {
                        u.normalize_column(k - 1, prev, config.numerical_policy, cancel)?;
                    }
                    sigmas.push(sigma);
                    Some(sigma)
                }
                None => None,
            };

            let elapsed_seconds = round_start.elapsed().as_secs_f64();
            match singular_value {
                Some(sigma) => info!(
                    "Component {}/{}: sigma={:.6e} after {} iterations ({:.3}s)",
                    k + 1,
                    nv,
                    sigma,
                    round.iterations,
                    elapsed_seconds
                ),
                None => info!(
                    "Component {}/{}: {} iterations ({:.3}s)",
                    k + 1,
                    nv,
                    round.iterations,
                    elapsed_seconds
                ),
            }
            rounds.push(RoundDiagnostics {
                round: k,
                iterations: round.iterations,
                residual: round.residual,
                converged: round.converged,
                singular_value,
                elapsed_seconds,
            });
            vectors.push(round.vector);
        }

        if let (Some(u), Some(&last)) = (u.as_mut(), sigmas.last()) {
            u.normalize_column(sigmas.len() - 1, last, config.numerical_policy, cancel)?;
        }
        cancel.check()?;

        let v = assemble_v(&vectors);
        let d = if config.only_v { None } else { Some(Array1::from(sigmas)) };
        let column_names = data.column_names();
        let pca = if config.recover_pca {
            debug!("Recovering PCA tables from {} components", nv);
            Some(PcaSummary::recover(v.view(), d.as_ref().map(|d| d.view()), n_rows, &column_names))
        } else {
            None
        };

        let mut diagnostics = SvdRunDiagnostics {
            v_orthogonality_error: compute_orthogonality_error(&v.view()),
            rounds,
            seed: base_seed,
            gram_fro_norm: Some(gram_fro_norm),
            total_runtime_seconds: Some(overall_start.elapsed().as_secs_f64()),
            notes: String::new(),
        };
        if !diagnostics.all_converged() {
            let message = format!(
                "Components {:?} did not reach tolerance {:.1e} within {} iterations",
                diagnostics.unconverged_rounds().iter().map(|r| r + 1).collect::<Vec<_>>(),
                config.tolerance,
                config.max_iterations
            );
            warn!("{}", message);
            notes.push(message);
        }
        diagnostics.notes = notes.join("; ");
        info!("SVD finished in {:.3?}", overall_start.elapsed());

        let u_key = u.as_ref().map(|u| u.key().to_string());
        let model = SvdModel {
            config: config.clone(),
            output: SvdOutput { v, d, u_key, normalization, column_names, n_rows, pca, diagnostics },
        };
        Ok(SvdFit { model, left_singular_vectors: u })
    }
}

fn check_gram(gram: &Gram, policy: NumericalPolicy) -> Result<(), SvdError> {
    let non_finite = gram.matrix.iter().filter(|x| !x.is_finite()).count();
    if non_finite == 0 {
        return Ok(());
    }
    let message = if gram.rows_used == 0 {
        format!("Gram matrix is undefined: all {} rows contain missing values", gram.rows_skipped)
    } else {
        format!(
            "Gram matrix has {} non-finite entries over {} complete rows; the data contains infinite values",
            non_finite, gram.rows_used
        )
    };
    match policy {
        NumericalPolicy::Propagate => Ok(()),
        NumericalPolicy::Warn => {
            warn!("{}", message);
            Ok(())
        }
        NumericalPolicy::Reject => Err(SvdError::NumericalDegeneracy(message)),
    }
}
