// src/diagnostics.rs

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::f64::INFINITY;

/// What happened in one deflation round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundDiagnostics {
    /// Zero-based round index.
    pub round: usize,
    pub iterations: usize,
    /// Convergence error of the last power iteration.
    pub residual: f64,
    pub converged: bool,
    /// Absent when only `V` was computed.
    pub singular_value: Option<f64>,
    pub elapsed_seconds: f64,
}

/// Diagnostics of a whole model build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SvdRunDiagnostics {
    pub rounds: Vec<RoundDiagnostics>,
    /// Seed the initial vectors were drawn from, whether configured or generated.
    pub seed: u64,
    /// `||G||_F` of the undeflated Gram matrix.
    pub gram_fro_norm: Option<f64>,
    /// `||I - V'V||_F`
    pub v_orthogonality_error: Option<f64>,
    pub total_runtime_seconds: Option<f64>,
    pub notes: String,
}

impl SvdRunDiagnostics {
    pub fn all_converged(&self) -> bool {
        self.rounds.iter().all(|r| r.converged)
    }

    /// Zero-based indices of rounds that ran out of iterations.
    pub fn unconverged_rounds(&self) -> Vec<usize> {
        self.rounds.iter().filter(|r| !r.converged).map(|r| r.round).collect()
    }
}

pub fn compute_frob_norm(matrix: &ArrayView2<f64>) -> f64 {
    if matrix.is_empty() {
        return 0.0;
    }
    matrix.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

/// Computes orthogonality error ||I - Q^T Q||_F.
pub fn compute_orthogonality_error(q_matrix: &ArrayView2<f64>) -> Option<f64> {
    if q_matrix.nrows() == 0 || q_matrix.ncols() == 0 {
        return None;
    }
    let qtq = q_matrix.t().dot(q_matrix);
    let diff = Array2::<f64>::eye(qtq.nrows()) - qtq;
    Some(compute_frob_norm(&diff.view()))
}

/// Computes the relative reconstruction error ||A - U S V^T||_F / ||A||_F.
///
/// `v` holds the right singular vectors as columns, as stored in a model.
pub fn compute_svd_reconstruction_error(
    original_matrix: &ArrayView2<f64>,
    u: &ArrayView2<f64>,
    s_vec: &ArrayView1<f64>,
    v: &ArrayView2<f64>,
) -> Option<f64> {
    if original_matrix.is_empty() {
        return None;
    }
    if u.ncols() != s_vec.len() || s_vec.len() != v.ncols() {
        return None;
    }
    if u.nrows() != original_matrix.nrows() || v.nrows() != original_matrix.ncols() {
        return None;
    }

    let us = u * &s_vec.view().insert_axis(ndarray::Axis(0));
    let reconstructed = us.dot(&v.t());
    let diff = original_matrix - &reconstructed;

    let norm_diff = compute_frob_norm(&diff.view());
    let norm_original = compute_frob_norm(original_matrix);
    if norm_original < 1e-12 {
        if norm_diff < 1e-12 {
            Some(0.0)
        } else {
            Some(INFINITY)
        }
    } else {
        Some(norm_diff / norm_original)
    }
}
