use crate::config::{ConvergenceCheck, NumericalPolicy, SvdConfig};
use crate::diagnostics::compute_svd_reconstruction_error;
use crate::error::{SvdError, ThreadSafeStdError};
use crate::frame::{ColumnKind, InMemoryFrame, PartitionedMatrix};
use crate::job::CancellationToken;
use crate::svd::PowerSvd;
use crate::transform::TransformPolicy;
use approx::assert_abs_diff_eq;
use ndarray::{array, s, Array2, CowArray, Ix2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

fn example_matrix() -> Array2<f64> {
    // Columns [1,2,3,4], [2,4,6,8], [1,0,1,0]; the first two are collinear.
    array![[1.0, 2.0, 1.0], [2.0, 4.0, 0.0], [3.0, 6.0, 1.0], [4.0, 8.0, 0.0]]
}

fn tight_config(nv: usize) -> SvdConfig {
    SvdConfig {
        nv,
        seed: Some(1234),
        tolerance: 1e-12,
        max_iterations: 100_000,
        ..SvdConfig::default()
    }
}

/// Counts partition reads and optionally cancels a token on the n-th one.
struct CountingFrame {
    inner: InMemoryFrame,
    reads: AtomicUsize,
    cancel_on_read: Option<(usize, CancellationToken)>,
}

impl CountingFrame {
    fn new(inner: InMemoryFrame) -> Self {
        Self { inner, reads: AtomicUsize::new(0), cancel_on_read: None }
    }
}

impl PartitionedMatrix for CountingFrame {
    fn num_cols(&self) -> usize {
        self.inner.num_cols()
    }
    fn num_partitions(&self) -> usize {
        self.inner.num_partitions()
    }
    fn partition_len(&self, index: usize) -> usize {
        self.inner.partition_len(index)
    }
    fn partition(&self, index: usize) -> Result<CowArray<'_, f64, Ix2>, ThreadSafeStdError> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, token)) = &self.cancel_on_read {
            if n >= *at {
                token.cancel();
            }
        }
        self.inner.partition(index)
    }
    fn column_kinds(&self) -> Vec<ColumnKind> {
        self.inner.column_kinds()
    }
}

#[test]
fn example_matrix_is_reconstructed_by_two_components() {
    let a = example_matrix();
    let frame = InMemoryFrame::from_matrix(a.view(), 2);
    let fit = PowerSvd::new(tight_config(2)).fit(&frame).unwrap();

    let v = fit.model.v();
    let d = fit.model.singular_values().unwrap();
    let u = fit.left_singular_vectors.as_ref().unwrap().to_matrix();
    assert_eq!(v.dim(), (3, 2));
    assert_eq!(u.dim(), (4, 2));
    assert!(d[0] >= d[1] && d[1] > 0.0, "singular values {}", d);
    // Column 2 is twice column 1, so every right singular vector keeps that ratio.
    assert_abs_diff_eq!(v[[1, 0]] / v[[0, 0]], 2.0, epsilon = 1e-8);
    assert!(d[0] > 5.0 * d[1], "first component should dominate: {}", d);
    assert!(fit.model.diagnostics().notes.is_empty(), "notes: {}", fit.model.diagnostics().notes);

    // The matrix has rank 2, so two components reproduce it.
    let err = compute_svd_reconstruction_error(&a.view(), &u.view(), &d.view(), &v.view()).unwrap();
    assert!(err < 1e-8, "relative reconstruction error {}", err);

    assert_abs_diff_eq!(v.t().dot(v), Array2::<f64>::eye(2), epsilon = 1e-8);
    assert_abs_diff_eq!(u.t().dot(&u), Array2::<f64>::eye(2), epsilon = 1e-8);
    // Frobenius norm of A equals the norm of its singular values.
    let fro_sq = a.mapv(|x| x * x).sum();
    assert_abs_diff_eq!(d.dot(d), fro_sq, epsilon = 1e-8 * fro_sq);
}

#[test]
fn each_left_vector_is_a_normalized_image_of_its_right_vector() {
    let a = example_matrix();
    let frame = InMemoryFrame::from_matrix(a.view(), 3);
    let fit = PowerSvd::new(tight_config(2)).fit(&frame).unwrap();
    let v = fit.model.v();
    let d = fit.model.singular_values().unwrap();
    let u = fit.left_singular_vectors.unwrap().to_matrix();
    for k in 0..2 {
        let av = a.dot(&v.column(k));
        assert_abs_diff_eq!(av / d[k], u.column(k).to_owned(), epsilon = 1e-8);
    }
}

#[test]
fn only_v_skips_singular_values_and_u() {
    let frame = InMemoryFrame::from_matrix(example_matrix().view(), 2);
    let config = SvdConfig { only_v: true, recover_pca: true, ..tight_config(2) };
    let fit = PowerSvd::new(config).fit(&frame).unwrap();
    assert!(fit.left_singular_vectors.is_none());
    assert!(fit.model.singular_values().is_none());
    assert!(fit.model.u_key().is_none());
    assert!(fit.model.importance().is_none());
    assert!(fit.model.eigenvectors().is_some());
    assert_eq!(fit.model.v().dim(), (3, 2));
    assert!(fit.model.diagnostics().rounds.iter().all(|r| r.singular_value.is_none()));
}

#[test]
fn single_iteration_budget_still_completes() {
    let frame = InMemoryFrame::from_matrix(example_matrix().view(), 2);
    let config = SvdConfig { nv: 2, max_iterations: 1, seed: Some(5), ..SvdConfig::default() };
    let fit = PowerSvd::new(config).fit(&frame).unwrap();
    let diag = fit.model.diagnostics();
    assert_eq!(diag.rounds.len(), 2);
    assert!(diag.rounds.iter().all(|r| r.iterations == 1));
    assert!(!diag.rounds[0].converged);
    assert!(diag.notes.contains("did not reach tolerance"), "notes: {}", diag.notes);
    assert_eq!(fit.model.singular_values().unwrap().len(), 2);
}

#[test]
fn validation_reports_all_problems_before_reading() {
    let inner = InMemoryFrame::from_matrix(example_matrix().view(), 2)
        .with_column_kinds(vec![ColumnKind::Numeric, ColumnKind::Categorical, ColumnKind::Numeric])
        .unwrap();
    let frame = CountingFrame::new(inner);
    let config = SvdConfig { nv: 5, max_iterations: 0, ..SvdConfig::default() };
    match PowerSvd::new(config).fit(&frame) {
        Err(SvdError::Validation(errors)) => {
            assert_eq!(errors.len(), 3, "{:?}", errors);
            assert!(errors.contains(&"max_iterations must be at least 1".to_string()));
            assert!(errors.contains(&"Number of right singular values must be between 1 and 3".to_string()));
            assert!(errors.contains(&"Training frame must contain all numeric data".to_string()));
        }
        other => panic!("expected validation errors, got {:?}", other.map(|_| ())),
    }
    assert_eq!(frame.reads.load(Ordering::SeqCst), 0);
}

#[test]
fn empty_frame_is_rejected() {
    let frame = InMemoryFrame::from_matrix(Array2::<f64>::zeros((0, 2)).view(), 0);
    assert!(matches!(PowerSvd::new(SvdConfig::default()).fit(&frame), Err(SvdError::Validation(_))));
}

#[test]
fn cancellation_during_singular_value_pass_discards_results() {
    let cancel = CancellationToken::new();
    let inner = InMemoryFrame::from_matrix(example_matrix().view(), 1);
    // Reads 1..=4 build the Gram matrix; read 6 falls inside the first sigma pass.
    let frame = CountingFrame { cancel_on_read: Some((6, cancel.clone())), ..CountingFrame::new(inner) };
    let result = PowerSvd::new(tight_config(2)).fit_cancellable(&frame, &cancel);
    assert!(matches!(result, Err(SvdError::Cancelled)));
    assert!(frame.reads.load(Ordering::SeqCst) < 4 + 4 * 2);
}

#[test]
fn unseeded_build_records_its_seed() {
    let frame = InMemoryFrame::from_matrix(example_matrix().view(), 2);
    let config = SvdConfig { seed: None, ..tight_config(2) };
    let first = PowerSvd::new(config.clone()).fit(&frame).unwrap();
    let seed = first.model.diagnostics().seed;

    let replay = PowerSvd::new(SvdConfig { seed: Some(seed), ..config }).fit(&frame).unwrap();
    assert_eq!(first.model.v(), replay.model.v());
    assert_eq!(first.model.singular_values(), replay.model.singular_values());
}

#[test]
fn fused_and_separate_normalization_agree() {
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let a = Array2::from_shape_fn((30, 4), |(_, j)| rng.gen_range(-1.0..1.0) * (4 - j) as f64);
    let frame = InMemoryFrame::from_matrix(a.view(), 7);
    let fused = PowerSvd::new(tight_config(3)).fit(&frame).unwrap();
    let separate = PowerSvd::new(SvdConfig { fuse_normalization: false, ..tight_config(3) })
        .fit(&frame)
        .unwrap();
    assert_eq!(fused.model.singular_values(), separate.model.singular_values());
    assert_abs_diff_eq!(
        fused.left_singular_vectors.unwrap().to_matrix(),
        separate.left_singular_vectors.unwrap().to_matrix(),
        epsilon = 1e-14
    );
}

#[test]
fn rows_with_missing_values_are_left_out_of_the_gram() {
    let mut rng = ChaCha8Rng::seed_from_u64(21);
    let complete = Array2::from_shape_fn((6, 3), |(_, j)| rng.gen_range(-1.0..1.0) * (3 - j) as f64);
    let mut a = Array2::<f64>::zeros((7, 3));
    a.slice_mut(s![..6, ..]).assign(&complete);
    a.row_mut(6).assign(&array![0.5, f64::NAN, 1.0]);

    let fit = PowerSvd::new(SvdConfig { only_v: true, ..tight_config(2) })
        .fit(&InMemoryFrame::from_matrix(a.view(), 3))
        .unwrap();
    assert!(fit.model.v().iter().all(|x| x.is_finite()), "V = {}", fit.model.v());
    let notes = &fit.model.diagnostics().notes;
    assert!(notes.contains("skipped 1 of 7 rows"), "notes: {}", notes);

    // Same V as a build over the complete rows alone.
    let reference = PowerSvd::new(SvdConfig { only_v: true, ..tight_config(2) })
        .fit(&InMemoryFrame::from_matrix(complete.view(), 3))
        .unwrap();
    assert_abs_diff_eq!(fit.model.v(), reference.model.v(), epsilon = 1e-12);
}

#[test]
fn missing_values_still_reach_the_singular_value_pass() {
    let mut a = example_matrix();
    a[[2, 1]] = f64::NAN;
    let frame = InMemoryFrame::from_matrix(a.view(), 2);

    let warned = PowerSvd::new(tight_config(1)).fit(&frame).unwrap();
    assert!(warned.model.v().iter().all(|x| x.is_finite()));
    assert!(warned.model.singular_values().unwrap()[0].is_nan());

    let config = SvdConfig { numerical_policy: NumericalPolicy::Reject, ..tight_config(1) };
    assert!(matches!(PowerSvd::new(config).fit(&frame), Err(SvdError::NumericalDegeneracy(_))));
}

#[test]
fn frame_without_complete_rows_is_rejected_under_reject_policy() {
    let a = array![[1.0, f64::NAN], [f64::NAN, 2.0], [f64::NAN, f64::NAN]];
    let frame = InMemoryFrame::from_matrix(a.view(), 2);
    let config = SvdConfig { numerical_policy: NumericalPolicy::Reject, ..tight_config(1) };
    match PowerSvd::new(config).fit(&frame) {
        Err(SvdError::NumericalDegeneracy(message)) => {
            assert!(message.contains("all 3 rows contain missing values"), "{}", message)
        }
        other => panic!("expected a numerical degeneracy, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn standardize_records_column_moments() {
    let a = example_matrix();
    let frame = InMemoryFrame::from_matrix(a.view(), 2);
    let config = SvdConfig { transform: TransformPolicy::Standardize, ..tight_config(1) };
    let fit = PowerSvd::new(config).fit(&frame).unwrap();
    assert_abs_diff_eq!(fit.model.norm_sub(), &array![2.5, 5.0, 0.5], epsilon = 1e-12);
    let sd0 = (5.0f64 / 3.0).sqrt();
    assert_abs_diff_eq!(fit.model.norm_mul()[0], 1.0 / sd0, epsilon = 1e-12);
}

#[test]
fn cumulative_convergence_runs_to_budget() {
    let frame = InMemoryFrame::from_matrix(example_matrix().view(), 2);
    let config = SvdConfig { convergence: ConvergenceCheck::Cumulative, max_iterations: 50, ..tight_config(1) };
    let fit = PowerSvd::new(config).fit(&frame).unwrap();
    let round = &fit.model.diagnostics().rounds[0];
    // err = sqrt(err + diff^2) tends to 1 as the estimate settles.
    assert_eq!(round.iterations, 50);
    assert!(!round.converged);
    assert!(round.residual > 0.5);

    let per_iteration = PowerSvd::new(tight_config(1)).fit(&frame).unwrap();
    assert!(per_iteration.model.diagnostics().rounds[0].converged);
    assert_abs_diff_eq!(
        fit.model.singular_values().unwrap()[0],
        per_iteration.model.singular_values().unwrap()[0],
        epsilon = 1e-9
    );
}
