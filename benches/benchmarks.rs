use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array2;
use power_svd::{InMemoryFrame, PowerSvd, SvdConfig, TransformPolicy};
use rand::distributions::Uniform;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::hint::black_box;

/// Random 0/1/2 data, seeded for reproducibility.
fn generate_random_data(n_samples: usize, n_features: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let distribution = Uniform::new_inclusive(0, 2);
    Array2::from_shape_fn((n_samples, n_features), |_| rng.sample(distribution) as f64)
}

fn criterion_benchmark_runner(c: &mut Criterion) {
    // (name, n_samples, n_features, nv, rows per partition)
    let scenarios = [
        ("tall_narrow", 20_000, 20, 5, 2_000),
        ("tall_medium", 10_000, 100, 10, 1_000),
        ("square", 1_000, 500, 5, 100),
    ];

    for &(name, n_samples, n_features, nv, rows_per_partition) in scenarios.iter() {
        let data = generate_random_data(n_samples, n_features, 42);
        let frame = InMemoryFrame::from_matrix(data.view(), rows_per_partition);

        let mut group = c.benchmark_group(format!("fit/{}", name));
        group.sample_size(10);
        group.throughput(Throughput::Bytes((n_samples * n_features * std::mem::size_of::<f64>()) as u64));

        for only_v in [false, true] {
            let config = SvdConfig {
                nv,
                only_v,
                transform: TransformPolicy::Standardize,
                seed: Some(7),
                ..SvdConfig::default()
            };
            let id = BenchmarkId::new(
                if only_v { "only_v" } else { "full" },
                format!("{}_s{}_f{}_k{}", name, n_samples, n_features, nv),
            );
            group.bench_with_input(id, &frame, |b, frame| {
                let svd = PowerSvd::new(config.clone());
                b.iter(|| black_box(svd.fit(frame).expect("benchmark fit failed")));
            });
        }
        group.finish();
    }
}

criterion_group!(benches, criterion_benchmark_runner);
criterion_main!(benches);
