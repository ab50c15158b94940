mod common;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;
use tasktrail::broker::MemoryBroker;
use tasktrail::model::Status;
use tasktrail::store::TaskStore;
use tasktrail::{Client, ClientOptions, EnqueueOptions, Error};

use common::{FailingStore, RecordingStore, RejectingBroker};

#[tokio::test]
async fn enqueue_records_created_then_enqueued() {
    let broker = Arc::new(MemoryBroker::new());
    let store = Arc::new(common::sqlite_store().await);
    let client = Client::new(broker.clone(), Some(store.clone()), ClientOptions::default());

    let info = client
        .enqueue(
            "email:welcome",
            &json!({"to": "a@example.com"}),
            EnqueueOptions::default().queue("mail"),
        )
        .await
        .unwrap();

    assert_eq!(info.queue, "mail");
    assert_eq!(broker.len("mail"), 1);

    let rec = store.get_by_id(&info.id).await.unwrap();
    assert_eq!(rec.status, Status::Created);
    assert_eq!(rec.task_type, "email:welcome");
    assert_eq!(rec.queue, "mail");
    assert_eq!(rec.payload, r#"{"to":"a@example.com"}"#);
    assert!(rec.enqueued_at > chrono::DateTime::UNIX_EPOCH);
}

#[tokio::test]
async fn audit_writes_happen_in_order() {
    let store = Arc::new(RecordingStore::default());
    let client = Client::new(
        Arc::new(MemoryBroker::new()),
        Some(store.clone()),
        ClientOptions::default(),
    );

    let info = client
        .enqueue("report:build", &42, EnqueueOptions::default())
        .await
        .unwrap();

    assert_eq!(
        store.calls(),
        vec![
            format!("insert_created:{}", info.id),
            format!("mark_enqueued:{}:default", info.id),
        ]
    );
}

#[tokio::test]
async fn failing_store_does_not_fail_enqueue() {
    let broker = Arc::new(MemoryBroker::new());
    let client = Client::new(broker.clone(), Some(Arc::new(FailingStore)), ClientOptions::default());

    let info = client
        .enqueue("email:welcome", &json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    assert!(!info.id.is_empty());
    assert_eq!(info.queue, "default");
    assert_eq!(broker.len("default"), 1);
}

#[tokio::test]
async fn broker_failure_is_returned_without_store_writes() {
    let store = Arc::new(RecordingStore::default());
    let client = Client::new(
        Arc::new(RejectingBroker),
        Some(store.clone()),
        ClientOptions::default(),
    );

    let err = client
        .enqueue("email:welcome", &json!({}), EnqueueOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Broker(_)), "got {err:?}");
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn default_queue_comes_from_options() {
    let broker = Arc::new(MemoryBroker::new());
    let client = Client::new(
        broker.clone(),
        None,
        ClientOptions {
            default_queue: "low".to_string(),
        },
    );
    assert_eq!(client.default_queue(), "low");

    let info = client
        .enqueue("cleanup", &(), EnqueueOptions::default().max_retry(3))
        .await
        .unwrap();
    assert_eq!(info.queue, "low");
    assert_eq!(info.max_retry, 3);
    assert_eq!(broker.len("low"), 1);
}

#[tokio::test]
async fn concurrent_enqueues_get_distinct_records() {
    let store = Arc::new(common::sqlite_store().await);
    let client = Arc::new(Client::new(
        Arc::new(MemoryBroker::new()),
        Some(store.clone()),
        ClientOptions::default(),
    ));

    let mut handles = Vec::new();
    for n in 0..16 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client
                .enqueue("email:welcome", &json!({ "n": n }), EnqueueOptions::default())
                .await
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        let info = handle.await.unwrap().unwrap();
        assert!(ids.insert(info.id));
    }
    assert_eq!(ids.len(), 16);

    let mut payloads = HashSet::new();
    for id in &ids {
        let rec = store.get_by_id(id).await.unwrap();
        assert_eq!(&rec.id, id);
        payloads.insert(rec.payload);
    }
    assert_eq!(payloads.len(), 16);
}

#[tokio::test]
async fn closed_broker_rejects_enqueue() {
    let broker = Arc::new(MemoryBroker::new());
    let client = Client::new(broker.clone(), None, ClientOptions::default());
    client.close().await.unwrap();

    assert!(broker.is_empty("default"));
    let err = client
        .enqueue("email:welcome", &json!({}), EnqueueOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Broker(_)));
}

#[tokio::test]
async fn unserializable_payload_fails_before_submission() {
    let broker = Arc::new(MemoryBroker::new());
    let store = Arc::new(RecordingStore::default());
    let client = Client::new(broker.clone(), Some(store.clone()), ClientOptions::default());

    // JSON object keys must be strings.
    let payload: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
    let err = client
        .enqueue("grid:update", &payload, EnqueueOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Serialization(_)), "got {err:?}");
    assert!(broker.is_empty("default"));
    assert_eq!(broker.in_flight_count(), 0);
    assert!(store.calls().is_empty());
}
