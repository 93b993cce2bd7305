//! ownergraph ingest
//!
//! Streams a beneficial-ownership NDJSON file (plain, gzip or zip) through
//! the worker pool into in-memory stores and prints a JSON summary.

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::error;
use tracing_subscriber::EnvFilter;

use ownergraph::config::IngestConfig;
use ownergraph::identifier::PSC_SNAPSHOT_DOCUMENT_ID;
use ownergraph::index::InMemoryIndex;
use ownergraph::reader::{self, Compression};
use ownergraph::staging::{CollectingSink, ImportMetadata, RawRecordStager};
use ownergraph::storage::InMemoryStores;
use ownergraph::{
    BeneficialOwnerImporter, GraphError, GraphResult, ImportContext, OwnershipGraph, Pipeline, Scope, UpsertEngine,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Build entities and relationships.
    Import,
    /// Only stage raw records and hand them downstream.
    Stage,
}

struct Args {
    input: String,
    config: Option<PathBuf>,
    workers: Option<usize>,
    queue: Option<usize>,
    compression: Option<Compression>,
    source_name: String,
    source_url: Option<String>,
    document_id: String,
    jurisdiction_code: Option<String>,
    lang_code: Option<String>,
    mode: Mode,
}

fn usage() {
    println!("ownergraph-ingest - beneficial-ownership ingestion");
    println!();
    println!("USAGE:");
    println!("    ownergraph-ingest <FILE|-> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <PATH>          JSON config file");
    println!("    -w, --workers <N>            Worker threads [default: available parallelism]");
    println!("    -q, --queue <N>              Records in flight [default: 100]");
    println!("        --compression <KIND>     none, gzip or zip [default: from file extension]");
    println!("        --source-name <NAME>     Source name recorded in provenance");
    println!("        --source-url <URL>       Source URL recorded in provenance");
    println!("        --document-id <ID>       Dataset id used in identifiers");
    println!("        --jurisdiction-code <C>  Jurisdiction for companies whose record has none");
    println!("        --lang-code <C>          Language of the source's free text");
    println!("        --stage                  Stage raw records only");
    println!("    -h, --help                   Print help information");
}

fn value_of(args: &[String], i: usize, flag: &str) -> String {
    args.get(i + 1).cloned().unwrap_or_else(|| {
        eprintln!("error: {flag} requires a value");
        std::process::exit(1);
    })
}

fn number_of(args: &[String], i: usize, flag: &str) -> usize {
    let raw = value_of(args, i, flag);
    raw.parse().unwrap_or_else(|_| {
        eprintln!("error: invalid value for {flag}: {raw}");
        std::process::exit(1);
    })
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut input = None;
    let mut parsed = Args {
        input: String::new(),
        config: None,
        workers: None,
        queue: None,
        compression: None,
        source_name: PSC_SNAPSHOT_DOCUMENT_ID.to_string(),
        source_url: None,
        document_id: PSC_SNAPSHOT_DOCUMENT_ID.to_string(),
        jurisdiction_code: None,
        lang_code: None,
        mode: Mode::Import,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                parsed.config = Some(PathBuf::from(value_of(&args, i, "--config")));
                i += 2;
            }
            "--workers" | "-w" => {
                parsed.workers = Some(number_of(&args, i, "--workers"));
                i += 2;
            }
            "--queue" | "-q" => {
                parsed.queue = Some(number_of(&args, i, "--queue"));
                i += 2;
            }
            "--compression" => {
                let raw = value_of(&args, i, "--compression");
                parsed.compression = Some(match raw.as_str() {
                    "none" => Compression::None,
                    "gzip" | "gz" => Compression::Gzip,
                    "zip" => Compression::Zip,
                    other => {
                        eprintln!("error: unknown compression: {other}");
                        std::process::exit(1);
                    }
                });
                i += 2;
            }
            "--source-name" => {
                parsed.source_name = value_of(&args, i, "--source-name");
                i += 2;
            }
            "--source-url" => {
                parsed.source_url = Some(value_of(&args, i, "--source-url"));
                i += 2;
            }
            "--document-id" => {
                parsed.document_id = value_of(&args, i, "--document-id");
                i += 2;
            }
            "--jurisdiction-code" => {
                parsed.jurisdiction_code = Some(value_of(&args, i, "--jurisdiction-code"));
                i += 2;
            }
            "--lang-code" => {
                parsed.lang_code = Some(value_of(&args, i, "--lang-code"));
                i += 2;
            }
            "--stage" => {
                parsed.mode = Mode::Stage;
                i += 1;
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            arg if input.is_none() && (arg == "-" || !arg.starts_with('-')) => {
                input = Some(arg.to_string());
                i += 1;
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    parsed.input = input.unwrap_or_else(|| {
        eprintln!("error: missing input file (use - for stdin)");
        std::process::exit(1);
    });
    parsed
}

/// Hands the lines of the selected input to `f`.
fn with_input<T, F>(args: &Args, f: F) -> GraphResult<T>
where
    F: FnOnce(reader::Lines<'_>) -> GraphResult<T>,
{
    if args.input == "-" {
        let compression = args.compression.unwrap_or_default();
        return reader::with_lines_unseekable(io::stdin().lock(), compression, f)?;
    }
    let compression = args
        .compression
        .unwrap_or_else(|| Compression::from_hint(&args.input));
    let file = File::open(&args.input).map_err(reader::ReaderError::from)?;
    reader::with_lines(file, compression, f)?
}

fn run(args: &Args) -> GraphResult<serde_json::Value> {
    let mut config = match &args.config {
        Some(path) => IngestConfig::load(path)?,
        None => IngestConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.pipeline.workers = workers;
    }
    if let Some(queue) = args.queue {
        config.pipeline.queue_capacity = queue;
    }
    config.validate()?;

    let stores = InMemoryStores::new();
    let mut metadata = ImportMetadata::new(args.source_name.clone(), Utc::now());
    metadata.source_url.clone_from(&args.source_url);

    match args.mode {
        Mode::Stage => {
            let sink = Arc::new(CollectingSink::new());
            let stager = RawRecordStager::new(stores.raw_records.clone(), sink.clone(), config.staging_chunk_size);
            let summary = with_input(args, |lines| stager.stage(lines, &metadata))?;
            Ok(serde_json::json!({
                "import_id": metadata.import_id,
                "staging": summary,
                "batches": sink.batches().len(),
            }))
        }
        Mode::Import => {
            let index = Arc::new(InMemoryIndex::new());
            let engine = UpsertEngine::new(stores.handles(), index.clone())
                .with_contention_policy(config.contention_retry);
            let mut context = ImportContext::new(args.document_id.clone(), metadata);
            context.jurisdiction_code.clone_from(&args.jurisdiction_code);
            context.lang_code.clone_from(&args.lang_code);
            let importer = BeneficialOwnerImporter::new(engine, context);
            let pipeline = Pipeline::new(config.pipeline.clone());

            let summary = with_input(args, |lines| pipeline.run(lines, &importer))?;

            let graph = OwnershipGraph::new(stores.handles());
            Ok(serde_json::json!({
                "import_id": importer.context().metadata.import_id,
                "pipeline": summary,
                "live_entities": graph.live_entity_count()?,
                "all_entities": stores.handles().entities.count(Scope::All)?,
                "relationships": stores.handles().relationships.count()?,
                "distinct_relationships": graph.distinct_relationship_count()?,
                "indexed": index.len(),
            }))
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = parse_args();
    match run(&args).and_then(|report| {
        serde_json::to_string_pretty(&report).map_err(|e| GraphError::internal(e.to_string()))
    }) {
        Ok(report) => println!("{report}"),
        Err(err) => {
            error!(error = %err, "ingest failed");
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}
