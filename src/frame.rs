// src/frame.rs

use crate::error::{SvdError, ThreadSafeStdError};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis, CowArray, Ix2};

/// Storage kind of a dataset column. Only numeric columns can be decomposed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Text,
}

/// Defines how the SVD builder reads a row-partitioned dataset.
///
/// A partition is a contiguous run of rows. The builder never asks for more
/// than one partition per worker at a time, so an implementor backed by disk
/// or a remote store only needs to materialise one partition per call.
/// Partitions are visited in parallel; an implementor must be `Sync`.
pub trait PartitionedMatrix: Sync {
    /// Number of columns of every partition.
    fn num_cols(&self) -> usize;

    fn num_partitions(&self) -> usize;

    /// Number of rows in partition `index`, available without reading it.
    fn partition_len(&self, index: usize) -> usize;

    /// Raw (not normalized) values of partition `index`.
    ///
    /// # Returns
    /// A matrix of shape `(partition_len(index), num_cols())`.
    fn partition(&self, index: usize) -> Result<CowArray<'_, f64, Ix2>, ThreadSafeStdError>;

    fn num_rows(&self) -> usize {
        (0..self.num_partitions()).map(|p| self.partition_len(p)).sum()
    }

    fn column_names(&self) -> Vec<String> {
        (1..=self.num_cols()).map(|c| format!("C{}", c)).collect()
    }

    fn column_kinds(&self) -> Vec<ColumnKind> {
        vec![ColumnKind::Numeric; self.num_cols()]
    }
}

/// Reads partition `index` and checks its shape against the metadata.
pub(crate) fn read_partition<M: PartitionedMatrix + ?Sized>(
    data: &M,
    index: usize,
) -> Result<CowArray<'_, f64, Ix2>, SvdError> {
    let block = data
        .partition(index)
        .map_err(|source| SvdError::Data { partition: index, source })?;
    let expected = (data.partition_len(index), data.num_cols());
    if block.dim() != expected {
        return Err(SvdError::Data {
            partition: index,
            source: format!(
                "partition has shape {:?}, metadata announces {:?}",
                block.dim(),
                expected
            )
            .into(),
        });
    }
    Ok(block)
}

/// An in-memory row-partitioned matrix.
#[derive(Clone, Debug)]
pub struct InMemoryFrame {
    partitions: Vec<Array2<f64>>,
    num_cols: usize,
    column_names: Vec<String>,
    column_kinds: Vec<ColumnKind>,
}

impl InMemoryFrame {
    /// Builds a frame from already partitioned row blocks.
    ///
    /// # Errors
    /// Returns a validation error if the blocks disagree on the column count
    /// or if no block is given.
    pub fn from_partitions(partitions: Vec<Array2<f64>>) -> Result<Self, SvdError> {
        let num_cols = match partitions.first() {
            Some(first) => first.ncols(),
            None => return Err(SvdError::Validation(vec!["Frame must contain at least one partition".into()])),
        };
        let ragged: Vec<String> = partitions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.ncols() != num_cols)
            .map(|(i, p)| format!("Partition {} has {} columns, expected {}", i, p.ncols(), num_cols))
            .collect();
        if !ragged.is_empty() {
            return Err(SvdError::Validation(ragged));
        }
        Ok(Self {
            partitions,
            num_cols,
            column_names: (1..=num_cols).map(|c| format!("C{}", c)).collect(),
            column_kinds: vec![ColumnKind::Numeric; num_cols],
        })
    }

    /// Splits a dense matrix into partitions of at most `rows_per_partition`
    /// rows. A `rows_per_partition` of zero keeps the matrix in one partition.
    pub fn from_matrix(data: ArrayView2<f64>, rows_per_partition: usize) -> Self {
        let n_rows = data.nrows();
        let step = if rows_per_partition == 0 { n_rows.max(1) } else { rows_per_partition };
        let mut partitions: Vec<Array2<f64>> = (0..n_rows)
            .step_by(step)
            .map(|start| data.slice(s![start..(start + step).min(n_rows), ..]).to_owned())
            .collect();
        if partitions.is_empty() {
            partitions.push(Array2::zeros((0, data.ncols())));
        }
        let num_cols = data.ncols();
        Self {
            partitions,
            num_cols,
            column_names: (1..=num_cols).map(|c| format!("C{}", c)).collect(),
            column_kinds: vec![ColumnKind::Numeric; num_cols],
        }
    }

    pub fn with_column_names(mut self, names: Vec<String>) -> Result<Self, SvdError> {
        if names.len() != self.num_cols {
            return Err(SvdError::Validation(vec![format!(
                "Got {} column names for {} columns",
                names.len(),
                self.num_cols
            )]));
        }
        self.column_names = names;
        Ok(self)
    }

    pub fn with_column_kinds(mut self, kinds: Vec<ColumnKind>) -> Result<Self, SvdError> {
        if kinds.len() != self.num_cols {
            return Err(SvdError::Validation(vec![format!(
                "Got {} column kinds for {} columns",
                kinds.len(),
                self.num_cols
            )]));
        }
        self.column_kinds = kinds;
        Ok(self)
    }

    pub fn partitions(&self) -> &[Array2<f64>] {
        &self.partitions
    }

    /// Concatenates all partitions back into one dense matrix.
    pub fn to_matrix(&self) -> Array2<f64> {
        let views: Vec<ArrayView2<f64>> = self.partitions.iter().map(|p| p.view()).collect();
        concatenate(Axis(0), &views).unwrap_or_else(|_| Array2::zeros((0, self.num_cols)))
    }
}

impl PartitionedMatrix for InMemoryFrame {
    fn num_cols(&self) -> usize {
        self.num_cols
    }

    fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    fn partition_len(&self, index: usize) -> usize {
        self.partitions[index].nrows()
    }

    fn partition(&self, index: usize) -> Result<CowArray<'_, f64, Ix2>, ThreadSafeStdError> {
        self.partitions
            .get(index)
            .map(|p| CowArray::from(p.view()))
            .ok_or_else(|| format!("partition index {} out of range", index).into())
    }

    fn column_names(&self) -> Vec<String> {
        self.column_names.clone()
    }

    fn column_kinds(&self) -> Vec<ColumnKind> {
        self.column_kinds.clone()
    }
}
