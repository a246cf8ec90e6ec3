//! In-process fakes for dispatcher tests
//!
//! `FakeFetcher` serves object bytes from a map and `RecordingStore` keeps
//! every batch it receives, so tests can assert on the exact write calls.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use recsink_common::types::{CanonicalRecord, ObjectRef};
use recsink_ingest::{
    dispatch::EventDispatcher,
    error::{FetchError, StoreError},
    fetch::ObjectFetcher,
    store::{BatchPutOutcome, RecordStore},
    writer::{BatchWriter, WriterConfig},
};
use tokio::sync::Mutex;

pub const TABLE: &str = "users-test";

#[derive(Default)]
pub struct FakeFetcher {
    objects: HashMap<ObjectRef, Vec<u8>>,
    fetched: Mutex<Vec<ObjectRef>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, bucket: &str, key: &str, body: &str) -> Self {
        self.objects
            .insert(ObjectRef::new(bucket, key), body.as_bytes().to_vec());
        self
    }

    pub async fn fetched(&self) -> Vec<ObjectRef> {
        self.fetched.lock().await.clone()
    }
}

#[async_trait]
impl ObjectFetcher for FakeFetcher {
    async fn fetch(&self, object: &ObjectRef) -> Result<Vec<u8>, FetchError> {
        self.fetched.lock().await.push(object.clone());
        self.objects
            .get(object)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                container: object.container.clone(),
                key: object.key.clone(),
            })
    }
}

/// Fetcher that takes `delay` per object and tracks how many fetches overlap
pub struct SlowFetcher {
    body: Vec<u8>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowFetcher {
    pub fn new(body: &str, delay: Duration) -> Self {
        Self {
            body: body.as_bytes().to_vec(),
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectFetcher for SlowFetcher {
    async fn fetch(&self, _object: &ObjectRef) -> Result<Vec<u8>, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.body.clone())
    }
}

/// How the store answers the next call
pub enum Reply {
    Ok,
    Reject,
    Unreachable,
}

#[derive(Default)]
pub struct RecordingStore {
    batches: Mutex<Vec<Vec<CanonicalRecord>>>,
    replies: Mutex<VecDeque<Reply>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: Vec<Reply>) -> Self {
        Self {
            batches: Mutex::default(),
            replies: Mutex::new(replies.into()),
        }
    }

    pub async fn batches(&self) -> Vec<Vec<CanonicalRecord>> {
        self.batches.lock().await.clone()
    }

    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().await.iter().map(Vec::len).collect()
    }

    pub async fn all_records(&self) -> Vec<CanonicalRecord> {
        self.batches.lock().await.iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn batch_put(
        &self,
        table: &str,
        records: &[CanonicalRecord],
    ) -> Result<BatchPutOutcome, StoreError> {
        assert_eq!(table, TABLE);
        self.batches.lock().await.push(records.to_vec());

        match self.replies.lock().await.pop_front().unwrap_or(Reply::Ok) {
            Reply::Ok => Ok(BatchPutOutcome::complete()),
            Reply::Reject => Err(StoreError::Rejected("ValidationException".into())),
            Reply::Unreachable => Err(StoreError::Unreachable("connection refused".into())),
        }
    }
}

pub fn dispatcher(fetcher: Arc<FakeFetcher>, store: Arc<RecordingStore>) -> EventDispatcher {
    EventDispatcher::new(fetcher, BatchWriter::new(store, WriterConfig::new(TABLE)))
        .with_concurrency(2)
}

/// CSV body with a `name,email` header and `n` rows
pub fn users_csv(n: usize) -> String {
    let mut body = String::from("name,email\n");
    for i in 0..n {
        body.push_str(&format!("user{i},user{i}@example.com\n"));
    }
    body
}
