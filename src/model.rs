// src/model.rs

use crate::config::SvdConfig;
use crate::diagnostics::SvdRunDiagnostics;
use crate::error::SvdError;
use crate::output::{ComponentTable, PcaSummary};
use crate::transform::Normalization;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Results of a model build.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SvdOutput {
    /// Right singular vectors as columns, shape `(n_cols, nv)`, in discovery order.
    pub v: Array2<f64>,
    /// Singular values, in discovery order. Absent when only `V` was computed.
    pub d: Option<Array1<f64>>,
    /// Store key of `U`. Absent when only `V` was computed.
    pub u_key: Option<String>,
    /// Per-column normalization the build applied to every row.
    pub normalization: Normalization,
    pub column_names: Vec<String>,
    pub n_rows: usize,
    /// Present when PCA recovery was requested.
    pub pca: Option<PcaSummary>,
    pub diagnostics: SvdRunDiagnostics,
}

/// A fitted model: the configuration it was built with plus its output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SvdModel {
    pub config: SvdConfig,
    pub output: SvdOutput,
}

impl SvdModel {
    pub fn v(&self) -> &Array2<f64> {
        &self.output.v
    }

    pub fn singular_values(&self) -> Option<&Array1<f64>> {
        self.output.d.as_ref()
    }

    pub fn u_key(&self) -> Option<&str> {
        self.output.u_key.as_deref()
    }

    pub fn norm_sub(&self) -> &Array1<f64> {
        &self.output.normalization.norm_sub
    }

    pub fn norm_mul(&self) -> &Array1<f64> {
        &self.output.normalization.norm_mul
    }

    pub fn eigenvectors(&self) -> Option<&ComponentTable> {
        self.output.pca.as_ref().map(|p| &p.eigenvectors)
    }

    pub fn std_deviation(&self) -> Option<&Array1<f64>> {
        self.output.pca.as_ref()?.std_deviation.as_ref()
    }

    pub fn importance(&self) -> Option<&ComponentTable> {
        self.output.pca.as_ref()?.importance.as_ref()
    }

    pub fn diagnostics(&self) -> &SvdRunDiagnostics {
        &self.output.diagnostics
    }

    /// Projects new rows onto the right singular vectors, applying the
    /// model's normalization first. Returns `(n_rows, nv)` scores.
    pub fn project(&self, rows: ndarray::ArrayView2<f64>) -> Result<Array2<f64>, SvdError> {
        if rows.ncols() != self.output.v.nrows() {
            return Err(SvdError::Validation(vec![format!(
                "Expected {} columns, got {}",
                self.output.v.nrows(),
                rows.ncols()
            )]));
        }
        Ok(self.output.normalization.apply(rows).dot(&self.output.v))
    }

    /// Saves the model to a file using bincode.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<(), SvdError> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| SvdError::Persistence(format!("Failed to serialize SVD model: {}", e)))?;
        Ok(())
    }

    /// Loads a model previously saved with `save_model`, rejecting files whose
    /// parts disagree on dimensions.
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self, SvdError> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let model: SvdModel = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .map_err(|e| SvdError::Persistence(format!("Failed to deserialize SVD model: {}", e)))?;
        model.check_consistency()?;
        Ok(model)
    }

    fn check_consistency(&self) -> Result<(), SvdError> {
        let out = &self.output;
        let (n_cols, nv) = out.v.dim();
        let mut problems = Vec::new();
        if out.normalization.num_cols() != n_cols || out.normalization.norm_mul.len() != n_cols {
            problems.push(format!(
                "normalization covers {} columns but V has {} rows",
                out.normalization.norm_sub.len(),
                n_cols
            ));
        }
        if out.column_names.len() != n_cols {
            problems.push(format!("{} column names for {} columns", out.column_names.len(), n_cols));
        }
        if nv != self.config.nv {
            problems.push(format!("V has {} columns but the model was built with nv = {}", nv, self.config.nv));
        }
        if let Some(d) = &out.d {
            if d.len() != nv {
                problems.push(format!("{} singular values for {} vectors", d.len(), nv));
            }
            if d.iter().any(|&sigma| sigma.is_finite() && sigma < 0.0) {
                problems.push("singular values must be non-negative".to_string());
            }
        }
        if out.d.is_some() != out.u_key.is_some() {
            problems.push("singular values and U key must be present together".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(SvdError::Persistence(format!("Loaded SVD model is inconsistent: {}", problems.join("; "))))
        }
    }
}
