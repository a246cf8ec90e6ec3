//! Chunked batch persistence
//!
//! [`BatchWriter::write`] slices the accumulated records into chunks no larger
//! than the store's per-call limit and issues one put per chunk, in order.
//! A chunk the store rejects, or items it leaves unprocessed, are recorded in
//! the returned [`WriteReport`] and the next chunk is still attempted. Only a
//! store that cannot be reached at all stops the run.

use std::sync::Arc;
use std::time::Duration;

use recsink_common::types::CanonicalRecord;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{InvocationError, StoreError, WriteError};
use crate::store::{RecordStore, MAX_BATCH_ITEMS};

/// What to do with items the store accepted but did not persist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnprocessedPolicy {
    /// Report them as failed straight away
    #[default]
    Report,
    /// Resubmit just those items up to `max_attempts` more times
    Retry { max_attempts: u32, delay: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    pub table: String,
    pub chunk_size: usize,
    pub unprocessed: UnprocessedPolicy,
}

impl WriterConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            chunk_size: MAX_BATCH_ITEMS,
            unprocessed: UnprocessedPolicy::Report,
        }
    }

    /// Clamped to `1..=MAX_BATCH_ITEMS`
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_BATCH_ITEMS);
        self
    }

    pub fn with_unprocessed_policy(mut self, policy: UnprocessedPolicy) -> Self {
        self.unprocessed = policy;
        self
    }
}

/// Outcome of writing one accumulated record set
#[derive(Debug, Default)]
pub struct WriteReport {
    pub chunks: usize,
    pub written: usize,
    pub failures: Vec<WriteError>,
}

impl WriteReport {
    pub fn failed_ids(&self) -> impl Iterator<Item = &Uuid> {
        self.failures.iter().flat_map(|f| f.ids().iter())
    }

    pub fn failed_count(&self) -> usize {
        self.failures.iter().map(|f| f.ids().len()).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct BatchWriter {
    store: Arc<dyn RecordStore>,
    config: WriterConfig,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn RecordStore>, config: WriterConfig) -> Self {
        let config = WriterConfig {
            chunk_size: config.chunk_size.clamp(1, MAX_BATCH_ITEMS),
            ..config
        };
        Self { store, config }
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Persist `records`, one store call per chunk.
    pub async fn write(&self, records: &[CanonicalRecord]) -> Result<WriteReport, InvocationError> {
        let mut report = WriteReport::default();

        for (chunk_index, chunk) in records.chunks(self.config.chunk_size).enumerate() {
            report.chunks += 1;

            match self.write_chunk(chunk_index, chunk).await {
                Ok(None) => {
                    report.written += chunk.len();
                },
                Ok(Some(failure)) => {
                    report.written += chunk.len() - failure.ids().len();
                    warn!(
                        table = %self.config.table,
                        chunk = chunk_index,
                        failed = failure.ids().len(),
                        error = %failure,
                        "Chunk partially written"
                    );
                    report.failures.push(failure);
                },
                Err(StoreError::Unreachable(reason)) => {
                    error!(
                        table = %self.config.table,
                        chunk = chunk_index,
                        error = %reason,
                        "Record store unreachable, aborting write"
                    );
                    return Err(InvocationError::StoreUnavailable {
                        chunk_index,
                        source: StoreError::Unreachable(reason),
                    });
                },
                Err(source) => {
                    error!(
                        table = %self.config.table,
                        chunk = chunk_index,
                        records = chunk.len(),
                        error = %source,
                        "Chunk rejected by record store"
                    );
                    report.failures.push(WriteError::ChunkRejected {
                        chunk_index,
                        ids: chunk.iter().map(|r| r.id).collect(),
                        source,
                    });
                },
            }
        }

        info!(
            table = %self.config.table,
            chunks = report.chunks,
            written = report.written,
            failed = report.failed_count(),
            "Batch write finished"
        );

        Ok(report)
    }

    /// One chunk, including any retries of unprocessed items.
    ///
    /// `Ok(Some(_))` carries the items still unprocessed once the policy is
    /// exhausted.
    async fn write_chunk(
        &self,
        chunk_index: usize,
        chunk: &[CanonicalRecord],
    ) -> Result<Option<WriteError>, StoreError> {
        let max_retries = match self.config.unprocessed {
            UnprocessedPolicy::Report => 0,
            UnprocessedPolicy::Retry { max_attempts, .. } => max_attempts,
        };

        let mut pending: Vec<CanonicalRecord> = chunk.to_vec();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let outcome = match self.store.batch_put(&self.config.table, &pending).await {
                Ok(outcome) => outcome,
                // A rejected retry only concerns what was still pending.
                Err(StoreError::Rejected(reason)) if attempts > 1 => {
                    warn!(chunk = chunk_index, error = %reason, "Retry of unprocessed items rejected");
                    return Ok(Some(WriteError::Unprocessed {
                        chunk_index,
                        ids: pending.iter().map(|r| r.id).collect(),
                        attempts,
                    }));
                },
                Err(err) => return Err(err),
            };

            if outcome.unprocessed.is_empty() {
                return Ok(None);
            }

            pending.retain(|record| outcome.unprocessed.contains(&record.id));
            if pending.is_empty() {
                // Store only named ids outside this chunk; nothing to resubmit.
                return Ok(None);
            }

            if attempts > max_retries {
                return Ok(Some(WriteError::Unprocessed {
                    chunk_index,
                    ids: pending.iter().map(|r| r.id).collect(),
                    attempts,
                }));
            }

            debug!(
                chunk = chunk_index,
                unprocessed = pending.len(),
                attempt = attempts,
                "Resubmitting unprocessed items"
            );
            if let UnprocessedPolicy::Retry { delay, .. } = self.config.unprocessed {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
