//! Bounded worker pool for record ingestion.
//!
//! One producer (the calling thread) reads lines and feeds a bounded queue;
//! `workers` named threads drain it and hand each line to a
//! [`RecordProcessor`]. The number of records in flight (queued plus being
//! processed) never exceeds `queue_capacity`, so a slow store slows the
//! reader down instead of growing memory.
//!
//! Per-record failures never stop the pool: malformed records are skipped,
//! timeout-class errors are retried, everything else is logged and counted.
//! A line the reader cannot decode is skipped like any malformed record; any
//! other reader failure cancels the whole run.

use std::io::{Read, Seek};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{GraphError, GraphResult, ValidationError};
use crate::reader::{self, Compression, ReaderError};
use crate::retry::{retry, Attempt, RetryPolicy};

/// Processes one raw record.
pub trait RecordProcessor: Sync {
    /// Handles a single line.
    ///
    /// # Errors
    /// Malformed input should surface as a validation error so the pool can
    /// skip it; timeout-class storage errors are retried.
    fn process(&self, line: &str) -> GraphResult<()>;
}

impl<F> RecordProcessor for F
where
    F: Fn(&str) -> GraphResult<()> + Sync,
{
    fn process(&self, line: &str) -> GraphResult<()> {
        self(line)
    }
}

/// Pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum records in flight.
    pub queue_capacity: usize,
    /// Policy for timeout-class errors.
    pub transient_retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            queue_capacity: 100,
            transient_retry: RetryPolicy::unbounded().with_backoff(50, 5_000),
        }
    }
}

impl PipelineConfig {
    /// Rejects configurations the pool cannot run with.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.workers == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "pipeline.workers must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "pipeline.queue_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Stops a run once set. Shared between the producer and the workers.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    /// Non-blank lines read from the input.
    pub read: u64,
    /// Records processed successfully.
    pub processed: u64,
    /// Malformed records skipped.
    pub skipped: u64,
    /// Records that failed after any retries.
    pub failed: u64,
    /// Retries of timeout-class errors.
    pub retries: u64,
    /// Highest number of records in flight at once.
    pub peak_in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// The worker pool.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Creates a pool. Zero workers or capacity are raised to one.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let config = PipelineConfig {
            workers: config.workers.max(1),
            queue_capacity: config.queue_capacity.max(1),
            ..config
        };
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// The effective configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token that cancels runs of this pool from outside. Once cancelled, the
    /// pool stays cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Feeds `lines` through `processor` and waits for every worker to finish.
    ///
    /// # Errors
    /// Returns the reader error if the input fails mid-stream. Records
    /// already queued at that point are dropped unprocessed.
    pub fn run<I, P>(&self, lines: I, processor: &P) -> GraphResult<PipelineSummary>
    where
        I: IntoIterator<Item = Result<String, ReaderError>>,
        P: RecordProcessor + ?Sized,
    {
        let capacity = self.config.queue_capacity;
        let counters = Counters::default();
        let (record_tx, record_rx) = bounded::<String>(capacity);
        let (permit_tx, permit_rx) = bounded::<()>(capacity);

        info!(
            workers = self.config.workers,
            queue_capacity = capacity,
            "starting ingestion run"
        );

        let (read, reader_error) = thread::scope(|scope| {
            for idx in 0..self.config.workers {
                let records = record_rx.clone();
                let permits = permit_rx.clone();
                let counters = &counters;
                thread::Builder::new()
                    .name(format!("ownergraph-worker-{idx}"))
                    .spawn_scoped(scope, move || {
                        self.work(&records, &permits, processor, counters);
                    })
                    .expect("failed to spawn ownergraph worker");
            }
            drop(record_rx);

            let mut read = 0u64;
            let mut reader_error = None;
            for item in lines {
                if self.cancel.is_cancelled() {
                    break;
                }
                match item {
                    Ok(line) => {
                        read += 1;
                        if permit_tx.send(()).is_err() {
                            break;
                        }
                        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);
                        if record_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.is_line_error() => {
                        read += 1;
                        warn!(error = %err, "skipping undecodable line");
                        counters.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        error!(error = %err, records_read = read, "reader failed, cancelling run");
                        self.cancel.cancel();
                        reader_error = Some(err);
                        break;
                    }
                }
            }
            drop(record_tx);
            (read, reader_error)
        });

        if let Some(err) = reader_error {
            return Err(GraphError::Reader(err));
        }

        let summary = PipelineSummary {
            read,
            processed: counters.processed.load(Ordering::SeqCst),
            skipped: counters.skipped.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            retries: counters.retries.load(Ordering::SeqCst),
            peak_in_flight: counters.peak_in_flight.load(Ordering::SeqCst),
        };
        info!(
            read = summary.read,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            retries = summary.retries,
            "ingestion run finished"
        );
        Ok(summary)
    }

    /// Opens `input` with the reader and runs the pool over its lines.
    ///
    /// # Errors
    /// Archive layout errors are returned before any record is processed.
    pub fn run_reader<R, P>(&self, input: R, compression: Compression, processor: &P) -> GraphResult<PipelineSummary>
    where
        R: Read + Seek,
        P: RecordProcessor + ?Sized,
    {
        reader::with_lines(input, compression, |lines| self.run(lines, processor))?
    }

    /// Opens a file by path and runs the pool over its lines.
    pub fn run_path<P>(&self, path: impl AsRef<Path>, processor: &P) -> GraphResult<PipelineSummary>
    where
        P: RecordProcessor + ?Sized,
    {
        reader::open_path(path, |lines| self.run(lines, processor))?
    }

    fn work<P>(&self, records: &Receiver<String>, permits: &Receiver<()>, processor: &P, counters: &Counters)
    where
        P: RecordProcessor + ?Sized,
    {
        while let Ok(line) = records.recv() {
            if !self.cancel.is_cancelled() {
                self.process_one(&line, processor, counters);
            }
            counters.in_flight.fetch_sub(1, Ordering::SeqCst);
            let _ = permits.recv();
        }
    }

    fn process_one<P>(&self, line: &str, processor: &P, counters: &Counters)
    where
        P: RecordProcessor + ?Sized,
    {
        let result = retry(&self.config.transient_retry, |attempt| {
            if attempt > 0 {
                counters.retries.fetch_add(1, Ordering::Relaxed);
            }
            match panic::catch_unwind(AssertUnwindSafe(|| processor.process(line))) {
                Ok(Ok(())) => Attempt::Done(()),
                Ok(Err(err)) if err.is_retryable() && !self.cancel.is_cancelled() => {
                    debug!(error = %err, attempt, "transient failure, retrying record");
                    Attempt::Retry(err)
                }
                Ok(Err(err)) => Attempt::Fail(err),
                Err(_) => Attempt::Fail(GraphError::internal("record processor panicked")),
            }
        });

        match result {
            Ok(()) => {
                counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) if err.is_malformed() => {
                warn!(error = %err, "skipping malformed record");
                counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                error!(error = %err, "record failed");
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use crate::storage::StorageError;

    fn ok_lines(n: usize) -> Vec<Result<String, ReaderError>> {
        (0..n).map(|i| Ok(format!("line-{i}"))).collect()
    }

    fn config(workers: usize, queue_capacity: usize) -> PipelineConfig {
        PipelineConfig {
            workers,
            queue_capacity,
            transient_retry: RetryPolicy::unbounded(),
        }
    }

    #[test]
    fn test_processes_every_line() {
        let seen = AtomicU64::new(0);
        let processor = |_: &str| -> GraphResult<()> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        let summary = Pipeline::new(config(4, 8)).run(ok_lines(200), &processor).unwrap();
        assert_eq!(summary.read, 200);
        assert_eq!(summary.processed, 200);
        assert_eq!(seen.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn test_in_flight_never_exceeds_capacity() {
        let processor = |_: &str| -> GraphResult<()> {
            thread::sleep(Duration::from_millis(1));
            Ok(())
        };
        let summary = Pipeline::new(config(3, 5)).run(ok_lines(100), &processor).unwrap();
        assert!(summary.peak_in_flight <= 5);
        assert!(summary.peak_in_flight >= 1);
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let processor = |line: &str| -> GraphResult<()> {
            if line.ends_with('3') {
                Err(ValidationError::MalformedRecord {
                    reason: "bad".to_string(),
                }
                .into())
            } else {
                Ok(())
            }
        };
        let summary = Pipeline::new(config(2, 4)).run(ok_lines(10), &processor).unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 9);
    }

    #[test]
    fn test_timeouts_are_retried() {
        let calls = AtomicU32::new(0);
        let processor = |_: &str| -> GraphResult<()> {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StorageError::Timeout {
                    operation: "entity.upsert".to_string(),
                    duration_ms: 10,
                }
                .into())
            } else {
                Ok(())
            }
        };
        let summary = Pipeline::new(config(1, 1)).run(ok_lines(1), &processor).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.retries, 2);
    }

    #[test]
    fn test_panics_and_errors_count_as_failed() {
        let processor = |line: &str| -> GraphResult<()> {
            match line {
                "line-0" => panic!("boom"),
                "line-1" => Err(GraphError::internal("nope")),
                _ => Ok(()),
            }
        };
        let summary = Pipeline::new(config(2, 2)).run(ok_lines(5), &processor).unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.processed, 3);
    }

    #[test]
    fn test_reader_error_aborts_run() {
        let mut lines = ok_lines(3);
        lines.push(Err(ReaderError::EmptyArchive));
        lines.extend(ok_lines(3));
        let processor = |_: &str| -> GraphResult<()> { Ok(()) };
        let err = Pipeline::new(config(2, 2)).run(lines, &processor).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_undecodable_line_is_skipped_and_the_run_continues() {
        let processor = |_: &str| -> GraphResult<()> { Ok(()) };
        let input = std::io::Cursor::new(b"good-1\n\xff\xfe bad\ngood-2\n".to_vec());
        let summary = Pipeline::new(config(2, 2))
            .run_reader(input, Compression::None, &processor)
            .unwrap();
        assert_eq!(summary.read, 3);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn test_config_validation() {
        assert!(config(0, 1).validate().is_err());
        assert!(config(1, 0).validate().is_err());
        assert!(PipelineConfig::default().validate().is_ok());
        assert_eq!(PipelineConfig::default().queue_capacity, 100);
    }
}
