// src/transform.rs

use crate::error::SvdError;
use crate::frame::{read_partition, PartitionedMatrix};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Column normalization applied to every row the builder reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformPolicy {
    /// Raw values.
    #[default]
    None,
    /// Subtract the column mean.
    Demean,
    /// Divide by the column standard deviation.
    Descale,
    /// Subtract the mean, then divide by the standard deviation.
    Standardize,
    /// Subtract the column minimum, then divide by the column range.
    Normalize,
}

/// Per-column summary statistics, mergeable across partitions.
///
/// NaN entries are counted as missing and excluded from every moment.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnStats {
    pub count: Array1<f64>,
    pub missing: Array1<f64>,
    pub mean: Array1<f64>,
    /// Sum of squared deviations from the mean.
    pub m2: Array1<f64>,
    pub min: Array1<f64>,
    pub max: Array1<f64>,
}

impl ColumnStats {
    pub fn empty(n_cols: usize) -> Self {
        ColumnStats {
            count: Array1::zeros(n_cols),
            missing: Array1::zeros(n_cols),
            mean: Array1::zeros(n_cols),
            m2: Array1::zeros(n_cols),
            min: Array1::from_elem(n_cols, f64::INFINITY),
            max: Array1::from_elem(n_cols, f64::NEG_INFINITY),
        }
    }

    /// Statistics of one block of rows.
    pub fn from_block(block: ArrayView2<f64>) -> Self {
        let mut stats = ColumnStats::empty(block.ncols());
        for row in block.axis_iter(Axis(0)) {
            for (j, &x) in row.iter().enumerate() {
                if x.is_nan() {
                    stats.missing[j] += 1.0;
                    continue;
                }
                stats.count[j] += 1.0;
                let delta = x - stats.mean[j];
                stats.mean[j] += delta / stats.count[j];
                stats.m2[j] += delta * (x - stats.mean[j]);
                stats.min[j] = stats.min[j].min(x);
                stats.max[j] = stats.max[j].max(x);
            }
        }
        stats
    }

    /// Combines the statistics of two disjoint row sets (Chan et al. update).
    pub fn merge(mut self, other: &ColumnStats) -> Self {
        for j in 0..self.count.len() {
            let (na, nb) = (self.count[j], other.count[j]);
            self.missing[j] += other.missing[j];
            if nb == 0.0 {
                continue;
            }
            if na == 0.0 {
                self.count[j] = nb;
                self.mean[j] = other.mean[j];
                self.m2[j] = other.m2[j];
                self.min[j] = other.min[j];
                self.max[j] = other.max[j];
                continue;
            }
            let n = na + nb;
            let delta = other.mean[j] - self.mean[j];
            self.mean[j] += delta * nb / n;
            self.m2[j] += other.m2[j] + delta * delta * na * nb / n;
            self.count[j] = n;
            self.min[j] = self.min[j].min(other.min[j]);
            self.max[j] = self.max[j].max(other.max[j]);
        }
        self
    }

    /// Sample standard deviation (n - 1 denominator).
    pub fn std_dev(&self) -> Array1<f64> {
        Zip::from(&self.m2)
            .and(&self.count)
            .map_collect(|&m2, &n| if n > 1.0 { (m2 / (n - 1.0)).sqrt() } else { 0.0 })
    }

    /// Computes the statistics of every partition in parallel and merges them
    /// in partition order.
    pub fn compute<M: PartitionedMatrix + ?Sized>(data: &M) -> Result<Self, SvdError> {
        let n_cols = data.num_cols();
        let partials: Vec<ColumnStats> = (0..data.num_partitions())
            .into_par_iter()
            .map(|p| -> Result<ColumnStats, SvdError> {
                let block = read_partition(data, p)?;
                Ok(ColumnStats::from_block(block.view()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(partials
            .iter()
            .fold(ColumnStats::empty(n_cols), |acc, part| acc.merge(part)))
    }
}

/// Per-column `(x - norm_sub) * norm_mul` normalization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub norm_sub: Array1<f64>,
    pub norm_mul: Array1<f64>,
}

impl Normalization {
    /// Leaves values untouched.
    pub fn identity(n_cols: usize) -> Self {
        Normalization {
            norm_sub: Array1::zeros(n_cols),
            norm_mul: Array1::ones(n_cols),
        }
    }

    /// Derives normalization vectors from column statistics.
    /// Columns with zero spread keep a multiplier of 1.
    pub fn from_stats(policy: TransformPolicy, stats: &ColumnStats) -> Self {
        let n_cols = stats.mean.len();
        let reciprocal = |spread: &Array1<f64>| {
            spread.mapv(|s| if s.is_finite() && s > 0.0 { 1.0 / s } else { 1.0 })
        };
        match policy {
            TransformPolicy::None => Normalization::identity(n_cols),
            TransformPolicy::Demean => Normalization {
                norm_sub: stats.mean.clone(),
                norm_mul: Array1::ones(n_cols),
            },
            TransformPolicy::Descale => Normalization {
                norm_sub: Array1::zeros(n_cols),
                norm_mul: reciprocal(&stats.std_dev()),
            },
            TransformPolicy::Standardize => Normalization {
                norm_sub: stats.mean.clone(),
                norm_mul: reciprocal(&stats.std_dev()),
            },
            TransformPolicy::Normalize => Normalization {
                norm_sub: stats.min.mapv(|m| if m.is_finite() { m } else { 0.0 }),
                norm_mul: reciprocal(&(&stats.max - &stats.min)),
            },
        }
    }

    /// Runs the statistics pass required by `policy`, if any, and returns the
    /// resulting normalization.
    pub fn compute<M: PartitionedMatrix + ?Sized>(
        data: &M,
        policy: TransformPolicy,
    ) -> Result<Self, SvdError> {
        if policy == TransformPolicy::None {
            debug!("Transform policy is None; using identity normalization.");
            return Ok(Normalization::identity(data.num_cols()));
        }
        let start = std::time::Instant::now();
        let stats = ColumnStats::compute(data)?;
        let missing_total: f64 = stats.missing.sum();
        if missing_total > 0.0 {
            debug!("Column statistics skipped {} missing entries.", missing_total);
        }
        info!("Computed {:?} normalization for {} columns in {:?}", policy, data.num_cols(), start.elapsed());
        Ok(Normalization::from_stats(policy, &stats))
    }

    pub fn num_cols(&self) -> usize {
        self.norm_sub.len()
    }

    /// Applies the normalization to a block of raw rows.
    pub fn apply(&self, block: ArrayView2<f64>) -> Array2<f64> {
        let mut out = block.to_owned();
        for row in out.axis_iter_mut(Axis(0)) {
            Zip::from(row)
                .and(&self.norm_sub)
                .and(&self.norm_mul)
                .for_each(|x, &sub, &mul| *x = (*x - sub) * mul);
        }
        out
    }
}
