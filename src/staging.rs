//! Raw record staging and downstream hand-off.
//!
//! Bulk sources are first stored verbatim as [`RawRecord`]s, chunk by chunk.
//! After every successful bulk write the ids that were actually new are
//! handed, with the import metadata, to a downstream stage that turns them
//! into entities and relationships.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{GraphError, GraphResult, ValidationError};
use crate::provenance::{Provenance, RawRecord, RawRecordId};
use crate::reader::ReaderError;
use crate::storage::RawRecordStore;

/// Describes one import of one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMetadata {
    pub import_id: String,
    pub source_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub retrieved_at: DateTime<Utc>,
}

impl ImportMetadata {
    /// Metadata for a new import with a fresh id.
    #[must_use]
    pub fn new(source_name: impl Into<String>, retrieved_at: DateTime<Utc>) -> Self {
        Self {
            import_id: Uuid::new_v4().to_string(),
            source_name: source_name.into(),
            source_url: None,
            retrieved_at,
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Relationship provenance stamped now.
    #[must_use]
    pub fn provenance(&self) -> Provenance {
        Provenance::new(self.source_name.clone(), self.source_url.clone(), self.retrieved_at)
    }
}

/// Newly staged records handed downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub raw_record_ids: Vec<RawRecordId>,
    pub metadata: ImportMetadata,
}

/// Receives batches of newly staged records.
pub trait DownstreamSink: Send + Sync {
    fn hand_off(&self, batch: ImportBatch) -> GraphResult<()>;
}

/// Sends batches over a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<ImportBatch>,
}

impl ChannelSink {
    #[must_use]
    pub const fn new(tx: Sender<ImportBatch>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiving end of a bounded channel.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, Receiver<ImportBatch>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl DownstreamSink for ChannelSink {
    fn hand_off(&self, batch: ImportBatch) -> GraphResult<()> {
        self.tx
            .send(batch)
            .map_err(|_| GraphError::internal("downstream channel disconnected"))
    }
}

/// Keeps every batch in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    batches: Mutex<Vec<ImportBatch>>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches received so far.
    #[must_use]
    pub fn batches(&self) -> Vec<ImportBatch> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

impl DownstreamSink for CollectingSink {
    fn hand_off(&self, batch: ImportBatch) -> GraphResult<()> {
        self.batches
            .lock()
            .map_err(|_| GraphError::internal("poisoned lock: collecting_sink"))?
            .push(batch);
        Ok(())
    }
}

/// Counts reported by a staging run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StagingSummary {
    pub lines: u64,
    pub malformed: u64,
    pub chunks: u64,
    pub inserted: u64,
    pub already_staged: u64,
    pub batches_handed_off: u64,
}

/// Writes raw lines to the raw record store in chunks.
#[derive(Clone)]
pub struct RawRecordStager {
    store: Arc<dyn RawRecordStore>,
    sink: Arc<dyn DownstreamSink>,
    chunk_size: usize,
}

impl std::fmt::Debug for RawRecordStager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawRecordStager")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

fn etag_of(line: &str) -> Result<Option<String>, ValidationError> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| ValidationError::MalformedRecord {
        reason: e.to_string(),
    })?;
    Ok(value
        .pointer("/data/etag")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string))
}

impl RawRecordStager {
    #[must_use]
    pub fn new(store: Arc<dyn RawRecordStore>, sink: Arc<dyn DownstreamSink>, chunk_size: usize) -> Self {
        Self {
            store,
            sink,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Stages every line and hands new ids downstream chunk by chunk.
    ///
    /// # Errors
    /// Reader failures abort the run; chunks written before the failure stay
    /// staged and handed off.
    pub fn stage<I>(&self, lines: I, metadata: &ImportMetadata) -> GraphResult<StagingSummary>
    where
        I: IntoIterator<Item = Result<String, ReaderError>>,
    {
        let mut summary = StagingSummary::default();
        let mut chunk = Vec::with_capacity(self.chunk_size);

        for line in lines {
            let line = match line {
                Ok(line) => line,
                Err(err) if err.is_line_error() => {
                    warn!(error = %err, import_id = %metadata.import_id, "skipping undecodable raw line");
                    summary.lines += 1;
                    summary.malformed += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            summary.lines += 1;
            match etag_of(&line) {
                Ok(etag) => chunk.push(RawRecord::new(line, etag, metadata.import_id.clone())),
                Err(err) => {
                    warn!(error = %err, import_id = %metadata.import_id, "skipping malformed raw line");
                    summary.malformed += 1;
                }
            }
            if chunk.len() >= self.chunk_size {
                self.flush(&mut chunk, metadata, &mut summary)?;
            }
        }
        if !chunk.is_empty() {
            self.flush(&mut chunk, metadata, &mut summary)?;
        }

        info!(
            import_id = %metadata.import_id,
            source_name = %metadata.source_name,
            lines = summary.lines,
            inserted = summary.inserted,
            already_staged = summary.already_staged,
            batches = summary.batches_handed_off,
            "staging finished"
        );
        Ok(summary)
    }

    fn flush(&self, chunk: &mut Vec<RawRecord>, metadata: &ImportMetadata, summary: &mut StagingSummary) -> GraphResult<()> {
        let records = std::mem::replace(chunk, Vec::with_capacity(self.chunk_size));
        let total = records.len() as u64;
        let inserted = self.store.bulk_upsert(records)?;

        summary.chunks += 1;
        summary.inserted += inserted.len() as u64;
        summary.already_staged += total - inserted.len() as u64;

        if inserted.is_empty() {
            debug!(import_id = %metadata.import_id, "chunk held no new records");
            return Ok(());
        }
        self.sink.hand_off(ImportBatch {
            raw_record_ids: inserted,
            metadata: metadata.clone(),
        })?;
        summary.batches_handed_off += 1;
        Ok(())
    }
}
