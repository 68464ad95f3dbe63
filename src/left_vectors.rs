// src/left_vectors.rs

use crate::config::NumericalPolicy;
use crate::error::SvdError;
use crate::frame::{read_partition, PartitionedMatrix};
use crate::job::CancellationToken;
use crate::transform::Normalization;
use log::{debug, trace, warn};
use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Left singular vectors `U`, stored with the row partitioning of the source
/// dataset: block `p` holds the rows of source partition `p`, one column per
/// singular vector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeftSingularVectors {
    key: String,
    blocks: Vec<Array2<f64>>,
    num_components: usize,
}

impl LeftSingularVectors {
    /// Allocates a zero-filled `U` laid out like `data`.
    pub fn zeros<M: PartitionedMatrix + ?Sized>(key: String, data: &M, num_components: usize) -> Self {
        let blocks = (0..data.num_partitions())
            .map(|p| Array2::zeros((data.partition_len(p), num_components)))
            .collect();
        Self { key, blocks, num_components }
    }

    /// Wraps already computed blocks.
    ///
    /// # Panics
    /// Panics if the blocks disagree on the column count.
    pub fn from_blocks(key: String, blocks: Vec<Array2<f64>>) -> Self {
        let num_components = blocks.first().map_or(0, |b| b.ncols());
        assert!(blocks.iter().all(|b| b.ncols() == num_components), "U blocks must share one column count");
        Self { key, blocks, num_components }
    }

    /// Store key under which the matrix is published.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn num_rows(&self) -> usize {
        self.blocks.iter().map(|b| b.nrows()).sum()
    }

    pub fn blocks(&self) -> &[Array2<f64>] {
        &self.blocks
    }

    /// All rows in partition order, shape `(num_rows, num_components)`.
    pub fn to_matrix(&self) -> Array2<f64> {
        let views: Vec<ArrayView2<f64>> = self.blocks.iter().map(|b| b.view()).collect();
        concatenate(Axis(0), &views).unwrap_or_else(|_| Array2::zeros((0, self.num_components)))
    }

    /// Column `k` across all partitions.
    pub fn column(&self, k: usize) -> Array1<f64> {
        self.blocks.iter().flat_map(|b| b.column(k).to_vec()).collect()
    }

    /// Divides column `k` of every block by `sigma`, one partition per task.
    pub fn normalize_column(
        &mut self,
        k: usize,
        sigma: f64,
        numerical_policy: NumericalPolicy,
        cancel: &CancellationToken,
    ) -> Result<(), SvdError> {
        check_divisor(sigma, k, numerical_policy)?;
        self.blocks.par_iter_mut().try_for_each(|block| -> Result<(), SvdError> {
            cancel.check()?;
            block.column_mut(k).mapv_inplace(|x| x / sigma);
            Ok(())
        })?;
        trace!("Normalized U column {} by {:.6e}", k, sigma);
        Ok(())
    }
}

fn check_divisor(sigma: f64, k: usize, policy: NumericalPolicy) -> Result<(), SvdError> {
    if sigma.is_finite() && sigma > 0.0 {
        return Ok(());
    }
    let message = format!("singular value {} is {}; U column {} cannot be normalized", k + 1, sigma, k + 1);
    match policy {
        NumericalPolicy::Propagate => Ok(()),
        NumericalPolicy::Warn => {
            warn!("{}", message);
            Ok(())
        }
        NumericalPolicy::Reject => Err(SvdError::NumericalDegeneracy(message)),
    }
}

/// One partition-parallel pass computing `sigma_k = ||A_{k-1} v_k||`.
///
/// For every row `r` the pass writes `s_r = <normalized row r, w>` into
/// column `k` of `U`, where `w = P_{k-1} v_k`, and accumulates `s_r^2`.
/// When `previous_sigma` is given, column `k - 1` of the same rows is divided
/// by it in the same sweep, which finalises the previous left singular vector
/// without an extra scan.
pub struct SingularValuePass<'a> {
    normalization: &'a Normalization,
    numerical_policy: NumericalPolicy,
    cancel: &'a CancellationToken,
}

impl<'a> SingularValuePass<'a> {
    pub fn new(
        normalization: &'a Normalization,
        numerical_policy: NumericalPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self { normalization, numerical_policy, cancel }
    }

    /// Runs the pass and returns `sigma_k`. Returns only after every
    /// partition has been processed.
    ///
    /// # Panics
    /// Panics if `k` is out of range for `u`, if `previous_sigma` is given
    /// for `k == 0`, or if `u` was not allocated for `data`.
    pub fn run<M: PartitionedMatrix + ?Sized>(
        &self,
        data: &M,
        u: &mut LeftSingularVectors,
        k: usize,
        pass_vector: ArrayView1<f64>,
        previous_sigma: Option<f64>,
    ) -> Result<f64, SvdError> {
        assert!(k < u.num_components, "component index {} out of range", k);
        assert!(previous_sigma.is_none() || k > 0, "the first column has no predecessor");
        assert_eq!(u.blocks.len(), data.num_partitions(), "U was allocated for a different partitioning");
        assert_eq!(pass_vector.len(), data.num_cols(), "pass vector length must match the column count");
        if let Some(prev) = previous_sigma {
            check_divisor(prev, k - 1, self.numerical_policy)?;
        }

        let norm_sub = &self.normalization.norm_sub;
        let norm_mul = &self.normalization.norm_mul;
        let n_cols = data.num_cols();

        let partial_sums: Vec<f64> = u
            .blocks
            .par_iter_mut()
            .enumerate()
            .map(|(p, u_block)| -> Result<f64, SvdError> {
                self.cancel.check()?;
                let rows = read_partition(data, p)?;
                let mut sum_sq = 0.0;
                for (r, row) in rows.axis_iter(Axis(0)).enumerate() {
                    let mut s = 0.0;
                    for j in 0..n_cols {
                        s += (row[j] - norm_sub[j]) * norm_mul[j] * pass_vector[j];
                    }
                    sum_sq += s * s;
                    u_block[[r, k]] = s;
                    if let Some(prev) = previous_sigma {
                        u_block[[r, k - 1]] /= prev;
                    }
                }
                trace!("Partition {}: {} rows, partial sum of squares {:.6e}", p, rows.nrows(), sum_sq);
                Ok(sum_sq)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let sigma = partial_sums.iter().sum::<f64>().sqrt();
        debug!("Singular value {} = {:.6e} from {} partitions", k + 1, sigma, partial_sums.len());
        Ok(sigma)
    }
}
