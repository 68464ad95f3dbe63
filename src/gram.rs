// src/gram.rs

use crate::error::SvdError;
use crate::frame::{read_partition, PartitionedMatrix};
use crate::job::CancellationToken;
use crate::transform::Normalization;
use log::{debug, info, trace, warn};
use ndarray::{Array2, Axis};
use rayon::prelude::*;

/// Gram matrix of the complete rows of a dataset.
#[derive(Clone, Debug)]
pub struct Gram {
    /// `A'A / rows_used`, all NaN when no row was complete.
    pub matrix: Array2<f64>,
    pub rows_used: usize,
    /// Rows left out because they hold at least one missing (NaN) value.
    pub rows_skipped: usize,
}

/// Reduces a row-partitioned dataset to its Gram matrix `A'A / n`, where `A`
/// is the normalized data restricted to its complete rows and `n` their count.
///
/// Each partition contributes the sum of its complete rows' outer products.
/// Partial sums are added in partition order, so the result does not depend
/// on how rayon schedules the partitions.
pub struct GramBuilder<'a> {
    normalization: &'a Normalization,
    cancel: &'a CancellationToken,
}

impl<'a> GramBuilder<'a> {
    pub fn new(normalization: &'a Normalization, cancel: &'a CancellationToken) -> Self {
        Self { normalization, cancel }
    }

    pub fn build<M: PartitionedMatrix + ?Sized>(&self, data: &M) -> Result<Gram, SvdError> {
        let n_cols = data.num_cols();
        let n_rows = data.num_rows();
        let start = std::time::Instant::now();

        let partials: Vec<(Array2<f64>, usize)> = (0..data.num_partitions())
            .into_par_iter()
            .map(|p| -> Result<(Array2<f64>, usize), SvdError> {
                self.cancel.check()?;
                let raw = read_partition(data, p)?;
                let block = self.normalization.apply(raw.view());
                let complete: Vec<usize> = block
                    .axis_iter(Axis(0))
                    .enumerate()
                    .filter(|(_, row)| row.iter().all(|x| !x.is_nan()))
                    .map(|(i, _)| i)
                    .collect();
                let used = complete.len();
                let block = if used == block.nrows() { block } else { block.select(Axis(0), &complete) };
                trace!("Gram partial for partition {} ({} of {} rows complete).", p, used, raw.nrows());
                Ok((block.t().dot(&block), used))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (mut matrix, rows_used) = partials.iter().fold(
            (Array2::<f64>::zeros((n_cols, n_cols)), 0usize),
            |(acc, count), (part, used)| (acc + part, count + used),
        );
        let rows_skipped = n_rows - rows_used;
        if rows_used == 0 {
            warn!("No complete rows among {}; the Gram matrix is undefined.", n_rows);
            matrix.fill(f64::NAN);
        } else {
            matrix /= rows_used as f64;
        }
        if rows_skipped > 0 {
            debug!("Gram matrix skipped {} rows with missing values.", rows_skipped);
        }

        info!("Computed {}x{} Gram matrix over {} rows in {:?}", n_cols, n_cols, rows_used, start.elapsed());
        Ok(Gram { matrix, rows_used, rows_skipped })
    }
}
