//! End-to-end dispatcher behavior against in-process fakes
//!
//! Run with: cargo test -p recsink-ingest --test dispatch_tests

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{dispatcher, users_csv, FakeFetcher, RecordingStore, Reply, SlowFetcher, TABLE};
use recsink_common::types::ObjectRef;
use recsink_ingest::{
    dispatch::{EventDispatcher, Trigger},
    error::{FetchError, InvocationError, ParseError, SourceError, WriteError},
    events::{ObjectNotificationEvent, QueueMessage, QueueMessageEvent},
    writer::{BatchWriter, WriterConfig},
};
use uuid::Uuid;

#[tokio::test]
async fn test_two_row_csv_becomes_two_records() {
    let fetcher = Arc::new(FakeFetcher::new().with_object(
        "uploads",
        "users.csv",
        "name,email\nAlice,a@x.com\nBob,b@x.com\n",
    ));
    let store = Arc::new(RecordingStore::new());
    let event = ObjectNotificationEvent::from_refs([("uploads", "users.csv")]);

    let report = dispatcher(fetcher, store.clone())
        .handle_object_notifications(&event)
        .await
        .unwrap();

    let records = store.all_records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name.as_deref(), Some("Alice"));
    assert_eq!(records[0].email.as_deref(), Some("a@x.com"));
    assert_eq!(records[1].name.as_deref(), Some("Bob"));
    assert_eq!(records[1].email.as_deref(), Some("b@x.com"));
    assert_ne!(records[0].id, records[1].id);

    assert_eq!(report.trigger, Trigger::ObjectNotification);
    assert_eq!(report.records, 2);
    assert_eq!(report.written(), 2);
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_fetch_failure_is_isolated_to_its_reference() {
    let fetcher = Arc::new(FakeFetcher::new().with_object("uploads", "good.csv", &users_csv(3)));
    let store = Arc::new(RecordingStore::new());
    let event = ObjectNotificationEvent::from_refs([("uploads", "missing.csv"), ("uploads", "good.csv")]);

    let report = dispatcher(fetcher.clone(), store.clone())
        .handle_object_notifications(&event)
        .await
        .unwrap();

    assert_eq!(store.batch_sizes().await, vec![3]);

    let failures: Vec<_> = report.source_failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "uploads/missing.csv");
    assert!(matches!(failures[0].1, SourceError::Fetch(FetchError::NotFound { .. })));

    assert_eq!(fetcher.fetched().await.len(), 2);
}

#[tokio::test]
async fn test_parse_failure_discards_only_that_object() {
    let fetcher = Arc::new(
        FakeFetcher::new()
            .with_object("uploads", "broken.csv", "name,email\nAlice,a@x.com\n\"Bob,b@x.com\n")
            .with_object("uploads", "fine.csv", &users_csv(2)),
    );
    let store = Arc::new(RecordingStore::new());
    let event = ObjectNotificationEvent::from_refs([("uploads", "broken.csv"), ("uploads", "fine.csv")]);

    let report = dispatcher(fetcher, store.clone())
        .handle_object_notifications(&event)
        .await
        .unwrap();

    let names: Vec<_> = store
        .all_records()
        .await
        .into_iter()
        .filter_map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["user0", "user1"]);

    assert!(matches!(
        report.sub_events[0].outcome,
        Err(SourceError::Parse(ParseError::UnterminatedQuote { .. }))
    ));
    assert_eq!(report.sub_events[1].outcome.as_ref().ok(), Some(&2));
}

#[tokio::test]
async fn test_records_accumulate_across_references_before_chunking() {
    let fetcher = Arc::new(
        FakeFetcher::new()
            .with_object("uploads", "a.csv", &users_csv(20))
            .with_object("uploads", "b.csv", &users_csv(10)),
    );
    let store = Arc::new(RecordingStore::new());
    let event = ObjectNotificationEvent::from_refs([("uploads", "a.csv"), ("uploads", "b.csv")]);

    let report = dispatcher(fetcher, store.clone())
        .handle_object_notifications(&event)
        .await
        .unwrap();

    assert_eq!(store.batch_sizes().await, vec![25, 5]);
    assert_eq!(report.write.as_ref().unwrap().chunks, 2);
    assert_eq!(report.written(), 30);
}

#[tokio::test]
async fn test_fetches_never_exceed_concurrency_limit() {
    let fetcher = Arc::new(SlowFetcher::new(&users_csv(1), Duration::from_millis(20)));
    let store = Arc::new(RecordingStore::new());
    let refs: Vec<(String, String)> = (0..10)
        .map(|i| ("uploads".to_string(), format!("part-{i}.csv")))
        .collect();
    let event = ObjectNotificationEvent::from_refs(refs);

    let report = EventDispatcher::new(
        fetcher.clone(),
        BatchWriter::new(store.clone(), WriterConfig::new(TABLE)),
    )
    .with_concurrency(3)
    .handle_object_notifications(&event)
    .await
    .unwrap();

    assert!(fetcher.peak() <= 3, "peak in-flight fetches was {}", fetcher.peak());
    assert!(fetcher.peak() > 1, "fetches never overlapped");
    assert_eq!(report.written(), 10);
}

#[tokio::test]
async fn test_object_keys_are_decoded_before_fetch() {
    let fetcher = Arc::new(FakeFetcher::new().with_object("uploads", "daily users+1.csv", &users_csv(1)));
    let store = Arc::new(RecordingStore::new());
    let event = ObjectNotificationEvent::from_refs([("uploads", "daily+users%2B1.csv")]);

    let report = dispatcher(fetcher.clone(), store.clone())
        .handle_object_notifications(&event)
        .await
        .unwrap();

    assert_eq!(
        fetcher.fetched().await,
        vec![ObjectRef::new("uploads", "daily users+1.csv")]
    );
    assert_eq!(report.written(), 1);
}

#[tokio::test]
async fn test_every_reference_failing_makes_no_write() {
    let fetcher = Arc::new(FakeFetcher::new().with_object("uploads", "empty.csv", "name,email\n"));
    let store = Arc::new(RecordingStore::new());
    let event = ObjectNotificationEvent::from_refs([
        ("uploads", "gone.csv"),
        ("uploads", "bad%FF.csv"),
        ("uploads", "bad%ZZ.csv"),
        ("uploads", "empty.csv"),
    ]);

    let report = dispatcher(fetcher, store.clone())
        .handle_object_notifications(&event)
        .await
        .unwrap();

    assert!(store.batches().await.is_empty());
    assert!(report.write.is_none());
    assert_eq!(report.records, 0);
    assert_eq!(report.source_failures().count(), 3);
    assert!(report
        .source_failures()
        .all(|(_, err)| matches!(err, SourceError::Fetch(_))));
}

#[tokio::test]
async fn test_empty_event_is_a_no_op() {
    let store = Arc::new(RecordingStore::new());

    let report = dispatcher(Arc::new(FakeFetcher::new()), store.clone())
        .handle_object_notifications(&ObjectNotificationEvent::default())
        .await
        .unwrap();

    assert!(store.batches().await.is_empty());
    assert!(report.sub_events.is_empty());
}

#[tokio::test]
async fn test_queue_messages_strip_supplied_ids() {
    let supplied = Uuid::new_v4();
    let store = Arc::new(RecordingStore::new());
    let event = QueueMessageEvent {
        records: vec![
            QueueMessage::new(format!(r#"{{"id":"{supplied}","name":"Alice","email":"a@x.com"}}"#))
                .with_id("m-1"),
            QueueMessage::new(r#"{"name":"Bob"}"#).with_id("m-2"),
        ],
    };

    let report = dispatcher(Arc::new(FakeFetcher::new()), store.clone())
        .handle_queue_messages(&event)
        .await
        .unwrap();

    let records = store.all_records().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.id != supplied));
    assert_eq!(records[1].email, None);
    assert_eq!(report.trigger, Trigger::QueueMessage);
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_undecodable_message_is_skipped() {
    let store = Arc::new(RecordingStore::new());
    let event = QueueMessageEvent::from_bodies([r#"{"name":"Alice"}"#, "not json", "[]", r#"{"name":"Carol"}"#]);

    let report = dispatcher(Arc::new(FakeFetcher::new()), store.clone())
        .handle_queue_messages(&event)
        .await
        .unwrap();

    assert_eq!(store.batch_sizes().await, vec![2]);

    let failed: Vec<&str> = report.source_failures().map(|(source, _)| source).collect();
    assert_eq!(failed, vec!["#1", "#2"]);
}

#[tokio::test]
async fn test_all_messages_failing_makes_no_write() {
    let store = Arc::new(RecordingStore::new());
    let event = QueueMessageEvent::from_bodies(["", "42"]);

    let report = dispatcher(Arc::new(FakeFetcher::new()), store.clone())
        .handle_queue_messages(&event)
        .await
        .unwrap();

    assert!(store.batches().await.is_empty());
    assert!(report.write.is_none());
    assert_eq!(report.source_failures().count(), 2);
}

#[tokio::test]
async fn test_rejected_chunk_is_reported_and_later_chunks_written() {
    let store = Arc::new(RecordingStore::with_replies(vec![Reply::Reject, Reply::Ok]));
    let bodies: Vec<String> = (0..30).map(|i| format!(r#"{{"name":"user{i}"}}"#)).collect();
    let event = QueueMessageEvent::from_bodies(bodies);

    let report = dispatcher(Arc::new(FakeFetcher::new()), store.clone())
        .handle_queue_messages(&event)
        .await
        .unwrap();

    let batches = store.batches().await;
    assert_eq!(store.batch_sizes().await, vec![25, 5]);

    let write = report.write.as_ref().unwrap();
    assert_eq!(write.written, 5);
    assert_eq!(report.dropped_records(), 25);
    assert!(matches!(write.failures[0], WriteError::ChunkRejected { chunk_index: 0, .. }));

    let rejected: HashSet<Uuid> = write.failed_ids().copied().collect();
    let first_batch: HashSet<Uuid> = batches[0].iter().map(|r| r.id).collect();
    assert_eq!(rejected, first_batch);
}

#[tokio::test]
async fn test_unreachable_store_fails_the_invocation() {
    let store = Arc::new(RecordingStore::with_replies(vec![Reply::Unreachable]));
    let event = QueueMessageEvent::from_bodies([r#"{"name":"Alice"}"#]);

    let result = dispatcher(Arc::new(FakeFetcher::new()), store)
        .handle_queue_messages(&event)
        .await;

    assert!(matches!(result, Err(InvocationError::StoreUnavailable { .. })));
}
