//! Benchmarks for imagery algorithms

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sda_algorithms::imagery::{compute, ndvi, BandSet, ChangeParams, ChangeRegions, Formula};
use sda_core::{GeoTransform, Raster};

fn create_band(size: usize, base: f64) -> Raster<f64> {
    let mut r = Raster::new(size, size);
    r.set_transform(GeoTransform::new(0.0, size as f64, 1.0, -1.0));
    for row in 0..size {
        for col in 0..size {
            let v = base + ((row * 7 + col * 13) % 200) as f64 * 0.001;
            r.set(row, col, v).unwrap();
        }
    }
    r
}

fn bench_ndvi(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/ndvi");
    for size in [256, 512, 1024, 2048] {
        let nir = create_band(size, 0.3);
        let red = create_band(size, 0.1);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| ndvi(black_box(&nir), black_box(&red)).unwrap())
        });
    }
    group.finish();
}

fn bench_evi(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/evi");
    for size in [256, 1024] {
        let mut bands = BandSet::new();
        bands.insert("B08", create_band(size, 0.3)).unwrap();
        bands.insert("B04", create_band(size, 0.1)).unwrap();
        bands.insert("B02", create_band(size, 0.05)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| compute(Formula::Evi, black_box(&bands)).unwrap())
        });
    }
    group.finish();
}

fn bench_change_regions(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/change_regions");
    for size in [256, 512, 1024] {
        let before = create_band(size, 0.5);
        let after = create_band(size, 0.4);
        let params = ChangeParams {
            threshold: 0.05,
            ..ChangeParams::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let regions =
                    ChangeRegions::new(black_box(&before), black_box(&after), params.clone())
                        .unwrap();
                regions.iter().count()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ndvi, bench_evi, bench_change_regions);
criterion_main!(benches);
