use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use ownergraph::identifier::Identifier;
use ownergraph::index::NoopNotifier;
use ownergraph::staging::ImportMetadata;
use ownergraph::{
    BeneficialOwnerImporter, ImportContext, NewEntity, Pipeline, PipelineConfig, Stores, UpsertEngine,
};

fn engine() -> UpsertEngine {
    UpsertEngine::new(Stores::in_memory(), Arc::new(NoopNotifier))
}

fn candidate(n: u64) -> NewEntity {
    NewEntity::legal_entity()
        .identifier(Identifier::open_corporates("gb", format!("{n:08}")))
        .name(format!("Company {n} Limited"))
}

fn record(n: usize) -> String {
    serde_json::json!({
        "company_number": format!("{:08}", n % 500),
        "company_name": format!("Company {} Limited", n % 500),
        "is_beneficial_owner": true,
        "owner_name": format!("Owner {}", n % 700),
        "interests": ["voting-rights-75-to-100-percent"],
    })
    .to_string()
}

fn bench_upsert_insert(c: &mut Criterion) {
    c.bench_function("upsert/insert_new", |b| {
        b.iter_custom(|iters| {
            // Fresh stores per sample so index size does not drift between samples.
            let engine = engine();
            let start = Instant::now();
            for n in 0..iters {
                engine.upsert(&candidate(n)).unwrap();
            }
            start.elapsed()
        });
    });
}

fn bench_upsert_update(c: &mut Criterion) {
    let engine = engine();
    for n in 0..1024 {
        engine.upsert(&candidate(n)).unwrap();
    }
    let mut n = 0u64;
    c.bench_function("upsert/update_existing", |b| {
        b.iter(|| {
            n = (n + 1) % 1024;
            engine.upsert(&candidate(n)).unwrap()
        });
    });
}

fn bench_pipeline_throughput(c: &mut Criterion) {
    const RECORDS: usize = 2_000;
    let lines: Vec<String> = (0..RECORDS).map(record).collect();

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(RECORDS as u64));
    group.sample_size(10);
    for workers in [1usize, 4, 8] {
        group.bench_function(format!("import_{workers}_workers"), |b| {
            b.iter(|| {
                let engine = engine();
                let context = ImportContext::new("GB PSC Snapshot", ImportMetadata::new("bench", Utc::now()));
                let importer = BeneficialOwnerImporter::new(engine, context);
                let pipeline = Pipeline::new(PipelineConfig {
                    workers,
                    ..PipelineConfig::default()
                });
                let summary = pipeline
                    .run(lines.iter().map(|l| Ok(l.clone())), &importer)
                    .unwrap();
                assert_eq!(summary.processed, RECORDS as u64);
            });
        });
    }
    group.finish();
}

criterion_group!(upsert, bench_upsert_insert, bench_upsert_update, bench_pipeline_throughput);
criterion_main!(upsert);
