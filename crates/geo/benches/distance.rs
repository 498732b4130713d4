//! Benchmarks for the geodesy hot path: one distance per continuous fix.

use carevisit_geo::{distance_meters, is_within_radius, parse_postgis_point, Coordinate, CHECK_IN_RADIUS_M};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

fn bench_single_distance(c: &mut Criterion) {
    let target = Coordinate::new(40.7128, -74.0060);
    let fix = Coordinate::new(40.7129, -74.0061);

    c.bench_function("distance_meters", |b| {
        b.iter(|| distance_meters(black_box(&fix), black_box(&target)))
    });

    c.bench_function("is_within_radius", |b| {
        b.iter(|| is_within_radius(black_box(&fix), black_box(&target), CHECK_IN_RADIUS_M))
    });
}

fn bench_fix_stream(c: &mut Criterion) {
    let target = Coordinate::new(40.7128, -74.0060);
    let mut group = c.benchmark_group("fix_stream");

    for size in [10, 100, 1000].iter() {
        // A worker walking toward the target
        let fixes: Vec<Coordinate> = (0..*size)
            .map(|i| Coordinate::new(40.7128 + 0.001 * (1.0 - i as f64 / *size as f64), -74.0060))
            .collect();

        group.bench_with_input(BenchmarkId::new("classify", size), size, |b, _| {
            b.iter(|| {
                fixes
                    .iter()
                    .filter(|fix| is_within_radius(black_box(fix), &target, CHECK_IN_RADIUS_M))
                    .count()
            })
        });
    }

    group.finish();
}

fn bench_postgis_parsing(c: &mut Criterion) {
    let geojson = json!({"type": "Point", "coordinates": [-74.0060, 40.7128]});
    let wkt = json!("POINT(-74.0060 40.7128)");
    let ewkb = json!("0101000020E6100000AAF1D24D628052C0B4C876BE9F5A4440");

    let mut group = c.benchmark_group("postgis_parsing");

    group.bench_function("geojson", |b| b.iter(|| parse_postgis_point(black_box(&geojson))));
    group.bench_function("wkt", |b| b.iter(|| parse_postgis_point(black_box(&wkt))));
    group.bench_function("ewkb", |b| b.iter(|| parse_postgis_point(black_box(&ewkb))));

    group.finish();
}

criterion_group!(benches, bench_single_distance, bench_fix_stream, bench_postgis_parsing);
criterion_main!(benches);
