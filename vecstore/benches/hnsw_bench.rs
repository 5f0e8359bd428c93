use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use faceid_vecstore::{HNSW, HNSWConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DIM: usize = 128;

fn random_vec(rng: &mut StdRng) -> Vec<f32> {
    (0..DIM).map(|_| rng.r#gen::<f32>() * 2.0 - 1.0).collect()
}

fn build(n: usize, rng: &mut StdRng) -> HNSW {
    let h = HNSW::with_capacity(
        HNSWConfig {
            dim: DIM,
            m: 32,
            ef_construction: 200,
            ef_search: 100,
            seed: Some(1),
        },
        n,
    );
    for i in 0..n {
        h.insert(i as u32, &random_vec(rng)).unwrap();
    }
    h
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_search_128d");
    for n in [1_000usize, 10_000] {
        let mut rng = StdRng::seed_from_u64(n as u64);
        let h = build(n, &mut rng);
        let query = random_vec(&mut rng);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let _ = black_box(h.search(black_box(&query), 1));
            });
        });
    }
    group.finish();
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("hnsw_insert_128d_into_5000", |b| {
        b.iter_with_setup(
            || {
                let mut rng = StdRng::seed_from_u64(9);
                let h = build(5_000, &mut rng);
                (h, random_vec(&mut rng))
            },
            |(h, v)| {
                let _ = black_box(h.insert(5_000, &v));
            },
        );
    });
}

criterion_group!(benches, bench_search, bench_insert);
criterion_main!(benches);
