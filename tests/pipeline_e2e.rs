//! Full ingestion runs: reader, worker pool, importer and stores together.

use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use flate2::write::GzEncoder;
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;

use ownergraph::index::InMemoryIndex;
use ownergraph::reader::ReaderError;
use ownergraph::staging::ImportMetadata;
use ownergraph::{
    BeneficialOwnerImporter, GraphError, GraphResult, ImportContext, OwnershipGraph, Pipeline, PipelineConfig,
    Scope, Stores, UpsertEngine,
};

const COMPANIES: usize = 50;
const OWNERS: usize = 80;

fn record(n: usize) -> String {
    let interest = if n % 3 == 0 {
        "ownership-of-shares-75-to-100-percent"
    } else {
        "voting-rights-75-to-100-percent"
    };
    // `line` keeps every line distinct so each one stages its own raw record.
    serde_json::json!({
        "line": n,
        "company_number": format!("{:08}", n % COMPANIES),
        "company_name": format!("Company {} Limited", n % COMPANIES),
        "jurisdiction_code": "gb",
        "is_beneficial_owner": true,
        "owner_name": format!("Owner {}", n % OWNERS),
        "owner_country": "GB",
        "interests": [interest],
    })
    .to_string()
}

fn ndjson(lines: usize) -> String {
    (0..lines).map(|n| record(n) + "\n").collect()
}

fn importer(stores: &Stores) -> (Arc<InMemoryIndex>, BeneficialOwnerImporter) {
    let index = Arc::new(InMemoryIndex::new());
    let engine = UpsertEngine::new(stores.clone(), index.clone());
    let context = ImportContext::new("GB PSC Snapshot", ImportMetadata::new("GB PSC Snapshot", Utc::now()));
    (index, BeneficialOwnerImporter::new(engine, context))
}

fn pipeline(workers: usize, queue_capacity: usize) -> Pipeline {
    Pipeline::new(PipelineConfig {
        workers,
        queue_capacity,
        ..PipelineConfig::default()
    })
}

fn temp_with_suffix(suffix: &str) -> NamedTempFile {
    tempfile::Builder::new().suffix(suffix).tempfile().unwrap()
}

#[test]
fn test_thousand_records_through_eight_workers() {
    const LINES: usize = 1000;
    let stores = Stores::in_memory();
    let (index, importer) = importer(&stores);

    let lines: Vec<Result<String, ReaderError>> = (0..LINES).map(|n| Ok(record(n))).collect();
    let summary = pipeline(8, 100).run(lines, &importer).unwrap();

    assert_eq!(summary.read, LINES as u64);
    assert_eq!(summary.processed, LINES as u64);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 0);
    assert!(summary.peak_in_flight <= 100);

    let pairs: HashSet<(usize, usize)> = (0..LINES).map(|n| (n % COMPANIES, n % OWNERS)).collect();
    let graph = OwnershipGraph::new(stores.clone());
    assert_eq!(stores.relationships.count().unwrap(), pairs.len());
    assert_eq!(graph.distinct_relationship_count().unwrap(), pairs.len());
    assert_eq!(graph.live_entity_count().unwrap(), COMPANIES + pairs.len());
    assert_eq!(stores.entities.count(Scope::All).unwrap(), COMPANIES + pairs.len());
    assert_eq!(stores.raw_records.count().unwrap(), LINES);
    assert_eq!(index.len(), COMPANIES + pairs.len());
}

#[test]
fn test_reimporting_changes_nothing() {
    let stores = Stores::in_memory();
    let (_, importer) = importer(&stores);
    let lines = || (0..200).map(|n| Ok(record(n))).collect::<Vec<Result<String, ReaderError>>>();

    pipeline(4, 16).run(lines(), &importer).unwrap();
    let entities = stores.entities.count(Scope::All).unwrap();
    let relationships = stores.relationships.count().unwrap();

    pipeline(4, 16).run(lines(), &importer).unwrap();
    assert_eq!(stores.entities.count(Scope::All).unwrap(), entities);
    assert_eq!(stores.relationships.count().unwrap(), relationships);
}

#[test]
fn test_backpressure_bounds_records_in_flight() {
    let active = AtomicUsize::new(0);
    let peak_active = AtomicUsize::new(0);
    let processor = |_: &str| -> GraphResult<()> {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak_active.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    };

    let lines: Vec<Result<String, ReaderError>> = (0..300).map(|n| Ok(n.to_string())).collect();
    let summary = pipeline(4, 10).run(lines, &processor).unwrap();

    assert_eq!(summary.processed, 300);
    assert!(summary.peak_in_flight <= 10, "peak {}", summary.peak_in_flight);
    assert!(peak_active.load(Ordering::SeqCst) <= 4);
}

#[test]
fn test_gzip_and_zip_sources() {
    let body = ndjson(120);

    let gz = temp_with_suffix(".ndjson.gz");
    let mut encoder = GzEncoder::new(gz.reopen().unwrap(), flate2::Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    encoder.finish().unwrap();

    let zipped = temp_with_suffix(".zip");
    let mut writer = zip::ZipWriter::new(zipped.reopen().unwrap());
    writer.start_file("snapshot.txt", SimpleFileOptions::default()).unwrap();
    writer.write_all(body.as_bytes()).unwrap();
    writer.finish().unwrap();

    for path in [gz.path(), zipped.path()] {
        let stores = Stores::in_memory();
        let (_, importer) = importer(&stores);
        let summary = pipeline(4, 32).run_path(path, &importer).unwrap();
        assert_eq!(summary.processed, 120, "{}", path.display());
        assert_eq!(stores.entities.count(Scope::Live).unwrap(), COMPANIES + 120);
    }
}

#[test]
fn test_multi_member_zip_is_fatal_before_any_record() {
    let zipped = temp_with_suffix(".zip");
    let mut writer = zip::ZipWriter::new(zipped.reopen().unwrap());
    for name in ["part-1.txt", "part-2.txt"] {
        writer.start_file(name, SimpleFileOptions::default()).unwrap();
        writer.write_all(ndjson(5).as_bytes()).unwrap();
    }
    writer.finish().unwrap();

    let calls = AtomicU64::new(0);
    let processor = |_: &str| -> GraphResult<()> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    };
    let err = pipeline(2, 4).run_path(zipped.path(), &processor).unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(
        err,
        GraphError::Reader(ReaderError::MultipleArchiveMembers { count: 2 })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_malformed_lines_are_skipped_and_the_run_continues() {
    let mut file = temp_with_suffix(".ndjson");
    writeln!(file, "{}", record(0)).unwrap();
    writeln!(file, "{{not json").unwrap();
    writeln!(file).unwrap();
    writeln!(file, r#"{{"is_beneficial_owner": true, "owner_name": "No Company"}}"#).unwrap();
    writeln!(file, r#"{{"company_number": "1", "is_beneficial_owner": true, "owner_name": "  "}}"#).unwrap();
    writeln!(file, "{}", record(1)).unwrap();
    file.flush().unwrap();

    let stores = Stores::in_memory();
    let (_, importer) = importer(&stores);
    let summary = pipeline(2, 4).run_path(file.path(), &importer).unwrap();

    assert_eq!(summary.read, 5);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(stores.relationships.count().unwrap(), 2);
}

#[test]
fn test_cancelled_pipeline_reads_nothing() {
    let pool = pipeline(2, 4);
    pool.cancellation_token().cancel();

    let lines: Vec<Result<String, ReaderError>> = (0..10).map(|n| Ok(n.to_string())).collect();
    let processor = |_: &str| -> GraphResult<()> { Ok(()) };
    let summary = pool.run(lines, &processor).unwrap();
    assert_eq!(summary.read, 0);
    assert_eq!(summary.processed, 0);
}
