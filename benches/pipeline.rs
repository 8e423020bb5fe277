use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kuba_insights::aggregation::aggregate;
use kuba_insights::catalog::{Catalog, DatasetDefinition, InMemorySource};
use kuba_insights::ranking::rank;
use kuba_insights::{answer, FilterSpec, Granularity};

fn create_catalog(rows_per_inverter: usize, inverters: usize) -> Catalog {
    let mut rows = Vec::with_capacity(rows_per_inverter * inverters);
    for i in 0..rows_per_inverter {
        let ts = 1_704_067_200 + (i as i64) * 300;
        for inv in 0..inverters {
            rows.push(vec![
                ts.to_string(),
                format!("INV-{:03}", inv),
                format!("{:.3}", (inv as f64 * 0.1) + (i % 17) as f64 * 0.01),
            ]);
        }
    }

    Catalog::builder()
        .add_source(
            DatasetDefinition::new("performance")
                .with_keywords(["downtime"])
                .with_key_columns(["timestamp", "inverter_id"]),
            InMemorySource::new(["timestamp", "inverter_id", "predicted downtime"], rows),
        )
        .build()
        .unwrap()
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    for size in [1_000, 10_000, 50_000].iter() {
        let catalog = create_catalog(*size / 20, 20);
        let selection = catalog.selection("performance", "predicted downtime").unwrap();
        let flat = FilterSpec::new();
        let hourly = FilterSpec::new().with_granularity(Granularity::Hour);

        group.bench_with_input(BenchmarkId::new("flat", size), size, |b, _| {
            b.iter(|| black_box(aggregate(&catalog, &selection, &flat).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("hourly", size), size, |b, _| {
            b.iter(|| black_box(aggregate(&catalog, &selection, &hourly).unwrap()));
        });
    }

    group.finish();
}

fn bench_rank(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank");

    for inverters in [10, 100, 1_000].iter() {
        let catalog = create_catalog(10, *inverters);
        let selection = catalog.selection("performance", "predicted downtime").unwrap();
        let table = aggregate(&catalog, &selection, &FilterSpec::new()).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(inverters), inverters, |b, _| {
            b.iter(|| black_box(rank(&table, "predicted downtime").unwrap()));
        });
    }

    group.finish();
}

fn bench_answer(c: &mut Criterion) {
    let catalog = create_catalog(500, 20);
    let filters = FilterSpec::new()
        .with_start_date("2024-01-01")
        .with_end_date("2024-01-02")
        .with_granularity(Granularity::Day);

    c.bench_function("answer_end_to_end", |b| {
        b.iter(|| {
            black_box(
                answer(&catalog, "which inverter has the most downtime?", Some(&filters)).unwrap(),
            )
        });
    });
}

criterion_group!(benches, bench_aggregate, bench_rank, bench_answer);
criterion_main!(benches);
