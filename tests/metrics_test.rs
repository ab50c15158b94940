//! Lifecycle transition metric, checked through an in-memory exporter.
//!
//! Kept in its own test binary: it installs a global meter provider.

mod common;

use chrono::Utc;
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};
use tasktrail::model::TaskRecord;
use tasktrail::store::TaskStore;

const TRANSITIONS: &str = "tasktrail.lifecycle.transitions";

fn exported(exporter: &InMemoryMetricExporter) -> bool {
    exporter
        .get_finished_metrics()
        .unwrap()
        .iter()
        .flat_map(|rm| rm.scope_metrics())
        .flat_map(|sm| sm.metrics())
        .any(|m| m.name() == TRANSITIONS)
}

#[tokio::test]
async fn transitions_count_only_matched_updates() {
    let store = common::sqlite_store().await;
    let rec = TaskRecord::created("task-1", "report:build", "default", "{}", Utc::now());
    store.insert_created(&rec).await.unwrap();

    let exporter = InMemoryMetricExporter::default();
    let provider = SdkMeterProvider::builder()
        .with_periodic_exporter(exporter.clone())
        .build();
    opentelemetry::global::set_meter_provider(provider.clone());

    store.mark_started("no-such-task", Utc::now()).await.unwrap();
    provider.force_flush().unwrap();
    assert!(!exported(&exporter), "zero-row update was counted");

    store.mark_started("task-1", Utc::now()).await.unwrap();
    provider.force_flush().unwrap();
    assert!(exported(&exporter));

    provider.shutdown().unwrap();
}
