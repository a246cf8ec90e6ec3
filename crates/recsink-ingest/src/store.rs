//! Record store backends
//!
//! A [`RecordStore`] performs exactly one batch put call. Chunking, retry of
//! unprocessed items and failure bookkeeping live in
//! [`BatchWriter`](crate::writer::BatchWriter).

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::{
    error::{DisplayErrorContext, SdkError},
    types::{AttributeValue, PutRequest, WriteRequest},
    Client,
};
use recsink_common::types::{CanonicalRecord, EMAIL_FIELD, ID_FIELD, NAME_FIELD};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::StoreError;

/// Hard limit on put requests per `BatchWriteItem` call.
pub const MAX_BATCH_ITEMS: usize = 25;

/// Result of a batch put the store answered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPutOutcome {
    /// Ids the store accepted the call for but did not persist
    pub unprocessed: Vec<Uuid>,
}

impl BatchPutOutcome {
    pub fn complete() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Put every record in `records` into `table`. Callers never pass more
    /// than [`MAX_BATCH_ITEMS`] records.
    async fn batch_put(
        &self,
        table: &str,
        records: &[CanonicalRecord],
    ) -> Result<BatchPutOutcome, StoreError>;
}

/// [`RecordStore`] backed by DynamoDB `BatchWriteItem`
#[derive(Clone)]
pub struct DynamoStore {
    client: Client,
}

impl DynamoStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordStore for DynamoStore {
    #[instrument(skip(self, records), fields(items = records.len()))]
    async fn batch_put(
        &self,
        table: &str,
        records: &[CanonicalRecord],
    ) -> Result<BatchPutOutcome, StoreError> {
        let requests = records
            .iter()
            .map(|record| {
                let put = PutRequest::builder()
                    .set_item(Some(to_item(record)))
                    .build()
                    .map_err(|err| StoreError::Rejected(err.to_string()))?;
                Ok(WriteRequest::builder().put_request(put).build())
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let response = self
            .client
            .batch_write_item()
            .request_items(table, requests)
            .send()
            .await
            .map_err(|err| match err {
                SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
                    StoreError::Unreachable(DisplayErrorContext(&err).to_string())
                },
                other => StoreError::Rejected(DisplayErrorContext(&other).to_string()),
            })?;

        let unprocessed: Vec<Uuid> = response
            .unprocessed_items()
            .and_then(|items| items.get(table))
            .map(|requests| requests.iter().filter_map(unprocessed_id).collect())
            .unwrap_or_default();

        debug!(
            table = %table,
            unprocessed = unprocessed.len(),
            "BatchWriteItem returned"
        );

        Ok(BatchPutOutcome { unprocessed })
    }
}

fn to_item(record: &CanonicalRecord) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::with_capacity(3);
    item.insert(ID_FIELD.to_string(), AttributeValue::S(record.id.to_string()));
    if let Some(name) = &record.name {
        item.insert(NAME_FIELD.to_string(), AttributeValue::S(name.clone()));
    }
    if let Some(email) = &record.email {
        item.insert(EMAIL_FIELD.to_string(), AttributeValue::S(email.clone()));
    }
    item
}

fn unprocessed_id(request: &WriteRequest) -> Option<Uuid> {
    let raw = request.put_request()?.item().get(ID_FIELD)?.as_s().ok()?;
    match raw.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(id = %raw, "Store returned an unprocessed item with a foreign id");
            None
        },
    }
}

/// In-process store keyed by table, used for dry runs.
///
/// Enforces the same per-call item limit as DynamoDB.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, HashMap<Uuid, CanonicalRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one table's contents
    pub async fn records(&self, table: &str) -> Vec<CanonicalRecord> {
        self.tables
            .lock()
            .await
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self, table: &str) -> usize {
        self.tables.lock().await.get(table).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn batch_put(
        &self,
        table: &str,
        records: &[CanonicalRecord],
    ) -> Result<BatchPutOutcome, StoreError> {
        if records.len() > MAX_BATCH_ITEMS {
            return Err(StoreError::Rejected(format!(
                "{} items exceeds the limit of {}",
                records.len(),
                MAX_BATCH_ITEMS
            )));
        }

        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table.to_string()).or_default();
        for record in records {
            rows.insert(record.id, record.clone());
        }

        Ok(BatchPutOutcome::complete())
    }
}
