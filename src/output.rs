// src/output.rs

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A labelled matrix, as reported to users of a fitted model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentTable {
    pub title: String,
    pub row_headers: Vec<String>,
    pub col_headers: Vec<String>,
    /// Shape: `(row_headers.len(), col_headers.len())`
    pub values: Array2<f64>,
}

impl ComponentTable {
    /// Value at the named row and column, if both exist.
    pub fn get(&self, row: &str, col: &str) -> Option<f64> {
        let r = self.row_headers.iter().position(|h| h == row)?;
        let c = self.col_headers.iter().position(|h| h == col)?;
        Some(self.values[[r, c]])
    }
}

impl fmt::Display for ComponentTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.title)?;
        let label_width = self.row_headers.iter().map(|h| h.len()).max().unwrap_or(0);
        let cell_width = self
            .col_headers
            .iter()
            .map(|h| h.len())
            .chain(self.values.iter().map(|v| format!("{:.5}", v).len()))
            .max()
            .unwrap_or(0);

        write!(f, "{:label_width$}", "")?;
        for header in &self.col_headers {
            write!(f, "  {:>cell_width$}", header)?;
        }
        writeln!(f)?;
        for (header, row) in self.row_headers.iter().zip(self.values.rows()) {
            write!(f, "{:label_width$}", header)?;
            for value in row.iter() {
                write!(f, "  {:>cell_width$.5}", value)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// `["PC1", "PC2", ...]`
pub fn component_headers(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("PC{}", i)).collect()
}

/// Stacks the right singular vectors, in discovery order, as the columns of
/// `V` (rows = original columns).
///
/// # Panics
/// Panics if the vectors differ in length.
pub fn assemble_v(vectors: &[Array1<f64>]) -> Array2<f64> {
    if vectors.is_empty() {
        return Array2::zeros((0, 0));
    }
    let n = vectors[0].len();
    assert!(vectors.iter().all(|v| v.len() == n), "right singular vectors must share one length");
    Array2::from_shape_fn((n, vectors.len()), |(i, k)| vectors[k][i])
}

/// PCA view of an SVD of centered data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PcaSummary {
    /// The rotation: `V` labelled with column names and component headers.
    pub eigenvectors: ComponentTable,
    /// `sigma_k / sqrt(n_rows - 1)`. Absent when only `V` was computed.
    pub std_deviation: Option<Array1<f64>>,
    /// Rows: standard deviation, proportion of variance, cumulative
    /// proportion. Absent when only `V` was computed.
    pub importance: Option<ComponentTable>,
}

impl PcaSummary {
    /// Derives the PCA tables from `V` and, when present, the singular values.
    pub fn recover(
        v: ArrayView2<f64>,
        singular_values: Option<ArrayView1<f64>>,
        n_rows: usize,
        column_names: &[String],
    ) -> Self {
        let headers = component_headers(v.ncols());
        let eigenvectors = ComponentTable {
            title: "Rotation".to_string(),
            row_headers: column_names.to_vec(),
            col_headers: headers.clone(),
            values: v.to_owned(),
        };

        let (std_deviation, importance) = match singular_values {
            Some(d) => {
                let df_correction = 1.0 / (n_rows as f64 - 1.0).sqrt();
                let sdev = d.mapv(|sigma| df_correction * sigma);
                let vars = sdev.mapv(|s| s * s);
                let total_var = vars.sum();
                let prop_var = vars.mapv(|v| v / total_var);
                let mut cum_var = prop_var.clone();
                for i in 1..cum_var.len() {
                    cum_var[i] += cum_var[i - 1];
                }
                let values = Array2::from_shape_fn((3, sdev.len()), |(r, c)| match r {
                    0 => sdev[c],
                    1 => prop_var[c],
                    _ => cum_var[c],
                });
                let table = ComponentTable {
                    title: "Importance of components".to_string(),
                    row_headers: vec![
                        "Standard deviation".to_string(),
                        "Proportion of Variance".to_string(),
                        "Cumulative Proportion".to_string(),
                    ],
                    col_headers: headers,
                    values,
                };
                (Some(sdev), Some(table))
            }
            None => (None, None),
        };

        PcaSummary { eigenvectors, std_deviation, importance }
    }
}
