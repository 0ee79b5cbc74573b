//! Benchmarks for the sampling pipeline.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    missing_docs
)]

use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mdcath_holdout::{
    stats, CathPath, Domain, DomainStore, FeatureMatrix, HomologyNetwork, NetworkSampler,
    NormMethod, RefinementController, SamplerConfig, StabilityClass, Stratifier, Validator,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn create_store(n: usize) -> DomainStore {
    let mut rng = StdRng::seed_from_u64(42);
    let domains = (0..n)
        .map(|i| {
            let t = (i % 80) as u32;
            let pdb = format!("{:04}", i / 2);
            Domain::new(
                format!("{pdb}A{:02}", i % 2),
                CathPath::new(t % 4 + 1, 10 * (t / 4 % 5 + 1), t + 1, i as u32),
                pdb,
                rng.gen_range(50..500),
                (0..6).map(|_| rng.gen::<f64>()).collect(),
                StabilityClass::ALL[rng.gen_range(0..3)],
            )
        })
        .collect();
    DomainStore::new(
        domains,
        ["helix_pct", "sheet_pct", "coil_pct", "core_ratio", "avg_rmsf_320", "avg_rmsf_450"],
    )
    .expect("Failed to create store")
}

fn bench_network(c: &mut Criterion) {
    let mut group = c.benchmark_group("homology_network");

    for size in [1_000, 5_398, 20_000] {
        let store = create_store(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("build", size), &store, |b, store| {
            b.iter(|| HomologyNetwork::build(black_box(store)));
        });
    }

    group.finish();
}

fn bench_stratify(c: &mut Criterion) {
    let mut group = c.benchmark_group("stratify");

    for size in [1_000, 5_398] {
        let store = create_store(size);
        let matrix = FeatureMatrix::from_store(&store, NormMethod::ZScore);
        let boosts = BTreeMap::new();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("kmeans_pool", size), &size, |b, _| {
            b.iter(|| {
                Stratifier::new(&store, &matrix)
                    .stratify(black_box(0.1), &boosts, 42)
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_sample_and_validate(c: &mut Criterion) {
    let store = create_store(5_398);
    let matrix = FeatureMatrix::from_store(&store, NormMethod::ZScore);
    let network = HomologyNetwork::build(&store);
    let pool = Stratifier::new(&store, &matrix)
        .stratify(0.1, &BTreeMap::new(), 42)
        .unwrap();
    let partition = NetworkSampler::new(&store, &network)
        .sample(&pool, 0.1, 0.02)
        .unwrap();

    c.bench_function("network_sample_5398", |b| {
        b.iter(|| {
            NetworkSampler::new(&store, &network)
                .sample(black_box(&pool), 0.1, 0.02)
                .unwrap()
        });
    });

    c.bench_function("validate_5398", |b| {
        let validator = Validator::new(&store);
        b.iter(|| validator.validate(black_box(partition.holdout())).unwrap());
    });
}

fn bench_refinement(c: &mut Criterion) {
    let store = create_store(5_398);
    let config = SamplerConfig::default().with_max_iterations(2);

    let mut group = c.benchmark_group("refinement");
    group.sample_size(10);
    group.bench_function("run_5398", |b| {
        b.iter(|| {
            RefinementController::new(&store, config.clone())
                .unwrap()
                .run()
                .unwrap()
        });
    });
    group.finish();
}

fn bench_stats(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let population: Vec<f64> = (0..5_398).map(|_| rng.gen::<f64>()).collect();
    let sample: Vec<f64> = population.iter().step_by(10).copied().collect();

    c.bench_function("ks_two_sample_540_vs_5398", |b| {
        b.iter(|| stats::ks_two_sample(black_box(&sample), black_box(&population)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_network,
    bench_stratify,
    bench_sample_and_validate,
    bench_refinement,
    bench_stats
);
criterion_main!(benches);
