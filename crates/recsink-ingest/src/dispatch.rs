//! Event entry points
//!
//! Each trigger kind has one handler. Both turn their sub-events into
//! canonical records, accumulate everything for the invocation, and hand the
//! full set to the [`BatchWriter`] once.
//!
//! A sub-event that fails (unreadable object, malformed CSV, undecodable
//! message) contributes nothing and is recorded in the
//! [`InvocationReport`]; its siblings are unaffected. Failed items are not
//! redelivered: callers that need them must act on the report or the logs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use recsink_common::types::CanonicalRecord;
use tracing::{debug, error, info, instrument, warn};

use crate::csv_stream::parse_rows;
use crate::error::{InvocationError, ParseError, SourceError};
use crate::events::{ObjectNotificationEvent, ObjectNotificationRecord, QueueMessageEvent};
use crate::fetch::ObjectFetcher;
use crate::transform::transform;
use crate::writer::{BatchWriter, WriteReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ObjectNotification,
    QueueMessage,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::ObjectNotification => write!(f, "object-notification"),
            Trigger::QueueMessage => write!(f, "queue-message"),
        }
    }
}

/// Outcome of one object reference or queue message
#[derive(Debug)]
pub struct SubEventReport {
    /// `bucket/key` for objects, message id (or position) for messages
    pub source: String,
    /// Number of records produced, or why there were none
    pub outcome: Result<usize, SourceError>,
}

#[derive(Debug)]
pub struct InvocationReport {
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sub_events: Vec<SubEventReport>,
    /// Records accumulated across all sub-events
    pub records: usize,
    /// `None` when nothing was accumulated and no write was attempted
    pub write: Option<WriteReport>,
}

impl InvocationReport {
    pub fn source_failures(&self) -> impl Iterator<Item = (&str, &SourceError)> {
        self.sub_events
            .iter()
            .filter_map(|s| s.outcome.as_ref().err().map(|e| (s.source.as_str(), e)))
    }

    pub fn written(&self) -> usize {
        self.write.as_ref().map_or(0, |w| w.written)
    }

    /// Records produced but not persisted
    pub fn dropped_records(&self) -> usize {
        self.write.as_ref().map_or(0, WriteReport::failed_count)
    }

    pub fn is_clean(&self) -> bool {
        self.source_failures().next().is_none() && self.dropped_records() == 0
    }
}

pub struct EventDispatcher {
    fetcher: Arc<dyn ObjectFetcher>,
    writer: BatchWriter,
    concurrency: usize,
}

impl EventDispatcher {
    pub fn new(fetcher: Arc<dyn ObjectFetcher>, writer: BatchWriter) -> Self {
        Self {
            fetcher,
            writer,
            concurrency: crate::config::DEFAULT_CONCURRENCY,
        }
    }

    /// Cap on object references fetched and parsed at once (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Ingest every CSV object named by an upload notification batch.
    #[instrument(skip_all, fields(references = event.records.len()))]
    pub async fn handle_object_notifications(
        &self,
        event: &ObjectNotificationEvent,
    ) -> Result<InvocationReport, InvocationError> {
        let started_at = Utc::now();
        info!("Object notification batch received");

        // `buffered` keeps completion order equal to input order, and the
        // merge below is the only writer to the accumulator.
        let loaded: Vec<(String, Result<Vec<CanonicalRecord>, SourceError>)> =
            stream::iter(&event.records)
                .map(|record| self.load_object(record))
                .buffered(self.concurrency)
                .collect()
                .await;

        let mut accumulated = Vec::new();
        let mut sub_events = Vec::with_capacity(loaded.len());

        for (source, result) in loaded {
            let outcome = match result {
                Ok(records) => {
                    debug!(source = %source, records = records.len(), "Object ingested");
                    let count = records.len();
                    accumulated.extend(records);
                    Ok(count)
                },
                Err(err) => {
                    error!(
                        source = %source,
                        kind = err.kind(),
                        error = %err,
                        "Skipping object"
                    );
                    Err(err)
                },
            };
            sub_events.push(SubEventReport { source, outcome });
        }

        self.finish(Trigger::ObjectNotification, started_at, sub_events, accumulated)
            .await
    }

    /// Ingest one record per queue message.
    #[instrument(skip_all, fields(messages = event.records.len()))]
    pub async fn handle_queue_messages(
        &self,
        event: &QueueMessageEvent,
    ) -> Result<InvocationReport, InvocationError> {
        let started_at = Utc::now();
        info!("Queue message batch received");

        let mut accumulated = Vec::with_capacity(event.records.len());
        let mut sub_events = Vec::with_capacity(event.records.len());

        for (position, message) in event.records.iter().enumerate() {
            let source = message
                .message_id
                .clone()
                .unwrap_or_else(|| format!("#{}", position));

            let outcome = match message.decode() {
                Ok(row) => {
                    accumulated.push(transform(row));
                    Ok(1)
                },
                Err(err) => {
                    error!(source = %source, error = %err, "Skipping undecodable message");
                    Err(SourceError::from(err))
                },
            };
            sub_events.push(SubEventReport { source, outcome });
        }

        self.finish(Trigger::QueueMessage, started_at, sub_events, accumulated)
            .await
    }

    async fn load_object(
        &self,
        record: &ObjectNotificationRecord,
    ) -> (String, Result<Vec<CanonicalRecord>, SourceError>) {
        let object = match record.object_ref() {
            Ok(object) => object,
            Err(err) => {
                let source = format!("{}/{}", record.s3.bucket.name, record.s3.object.key);
                return (source, Err(err.into()));
            },
        };

        let source = object.to_string();
        let result = async {
            let bytes = self.fetcher.fetch(&object).await?;
            let records = parse_rows(&bytes)
                .map(|row| row.map(transform))
                .collect::<Result<Vec<_>, ParseError>>()?;
            Ok::<_, SourceError>(records)
        }
        .await;

        (source, result)
    }

    async fn finish(
        &self,
        trigger: Trigger,
        started_at: DateTime<Utc>,
        sub_events: Vec<SubEventReport>,
        accumulated: Vec<CanonicalRecord>,
    ) -> Result<InvocationReport, InvocationError> {
        let write = if accumulated.is_empty() {
            info!(trigger = %trigger, "No records produced, skipping write");
            None
        } else {
            Some(self.writer.write(&accumulated).await?)
        };

        let report = InvocationReport {
            trigger,
            started_at,
            finished_at: Utc::now(),
            sub_events,
            records: accumulated.len(),
            write,
        };

        let failed_sources = report.source_failures().count();
        if report.is_clean() {
            info!(
                trigger = %trigger,
                records = report.records,
                written = report.written(),
                "Invocation complete"
            );
        } else {
            warn!(
                trigger = %trigger,
                records = report.records,
                written = report.written(),
                failed_sources,
                dropped_records = report.dropped_records(),
                "Invocation complete with failures; failed items will not be redelivered"
            );
        }

        Ok(report)
    }
}
