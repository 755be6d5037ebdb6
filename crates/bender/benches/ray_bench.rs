//! Criterion benchmarks for whole rays: a refraction with several candidate
//! levels and a surface-reflected depth phase.

use bender::prelude::*;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

fn bench_ray(c: &mut Criterion) {
    let model = LayeredModel::two_layer(6371.0, 20.0, 5.0, 8.0).unwrap();
    let cfg = BenderCfg::default();
    let levels = LevelSet::new(vec![
        Level::Radius {
            layer: 0,
            radius: 6345.0,
        },
        Level::top_of(0),
    ]);
    let refracted = PhaseTopology::refracted(levels.clone(), WaveType::P);
    let depth_phase = PhaseTopology::depth_phase(1, levels, WaveType::P);
    let src = position(&model, 0.0, 0.0, 5.0);
    let rcv = position(&model, 0.0, 2.0, 5.0);

    let mut group = c.benchmark_group("ray");
    group.sample_size(10);
    for (name, phase) in [("refracted", &refracted), ("depth_phase", &depth_phase)] {
        group.bench_function(name, |b| {
            b.iter_batched(
                || Ray::new(&model, &cfg, src, rcv, phase).unwrap(),
                |mut ray| {
                    let _ = ray.optimize();
                    ray.travel_time()
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ray);
criterion_main!(benches);
