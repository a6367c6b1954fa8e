//! Integration tests for the ingest pipeline.

use chrono::{TimeZone, Utc};
use enviro_readings::remote::InMemoryDocumentStore;
use enviro_readings::{
    IngestConfig, IngestError, IngestPipeline, ReadingsStore, SchemaNormalizer, StoreConfig,
    StoreError,
};
use serde_json::{json, Value};

fn pipeline_with(
    remote: InMemoryDocumentStore,
    required_metrics: &[&str],
) -> IngestPipeline<InMemoryDocumentStore> {
    let store = ReadingsStore::new(
        remote,
        &StoreConfig::default(),
        SchemaNormalizer::new("enviro-garden"),
    );
    IngestPipeline::new(
        store,
        IngestConfig {
            accepted_source: "enviro-garden".into(),
            username: "enviro".into(),
            password: "secret".into(),
            required_metrics: required_metrics.iter().map(|m| m.to_string()).collect(),
        },
    )
}

fn pipeline() -> IngestPipeline<InMemoryDocumentStore> {
    pipeline_with(InMemoryDocumentStore::new(), &[])
}

fn payload(source: &str, minute: u32) -> Value {
    json!({
        "nickname": source,
        "timestamp": format!("2023-09-29 08:{:02}:00", minute),
        "readings": {
            "temperature": 20.0 + minute as f64,
            "humidity": 55.2,
            "pressure": 1012.4,
            "noise": 0.59,
            "pm1": 2,
            "pm2_5": 3,
            "pm10": 4,
            "voltage": 4.93
        },
        "model": "urban",
        "uid": "e6614c311b6a"
    })
}

#[test]
fn single_payload_is_treated_as_one_element_batch() {
    let pipeline = pipeline();
    let report = pipeline.ingest(&payload("enviro-garden", 0)).unwrap();
    assert_eq!(report.accepted, 1);
    assert_eq!(report.filtered, 0);

    let stored = pipeline.store().load_all().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].source_id, "enviro-garden");
    assert_eq!(
        stored[0].timestamp,
        Utc.with_ymd_and_hms(2023, 9, 29, 8, 0, 0).unwrap()
    );
    assert_eq!(stored[0].fields.len(), 8);
    assert_eq!(stored[0].field("noise"), Some(0.59));
}

#[test]
fn foreign_sources_are_dropped_silently() {
    let pipeline = pipeline();
    let batch = json!([
        payload("enviro-garden", 1),
        payload("enviro-kitchen", 2),
        payload("enviro-garden", 3),
        payload("enviro-attic", 4),
        payload("enviro-garden", 5),
    ]);

    let report = pipeline.ingest(&batch).unwrap();
    assert_eq!(report.accepted, 3);
    assert_eq!(report.filtered, 2);
    assert_eq!(report.rejected_count(), 0);

    let stored = pipeline.store().load_all().unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|r| r.source_id == "enviro-garden"));
    let minutes: Vec<u32> = stored
        .iter()
        .map(|r| chrono::Timelike::minute(&r.timestamp))
        .collect();
    assert_eq!(minutes, vec![1, 3, 5]);
}

#[test]
fn batch_is_written_with_a_single_append() {
    let remote = InMemoryDocumentStore::new();
    let pipeline = pipeline_with(remote.clone(), &[]);
    let batch = Value::Array((0..40).map(|m| payload("enviro-garden", m)).collect());

    pipeline.ingest(&batch).unwrap();
    assert_eq!(remote.replace_count(), 1);
    assert_eq!(pipeline.store().load_all().unwrap().len(), 40);
}

#[test]
fn fully_filtered_batch_writes_nothing() {
    let remote = InMemoryDocumentStore::new();
    let pipeline = pipeline_with(remote.clone(), &[]);
    let report = pipeline
        .ingest(&json!([payload("enviro-kitchen", 1)]))
        .unwrap();
    assert_eq!(report.accepted, 0);
    assert_eq!(report.filtered, 1);
    assert_eq!(remote.replace_count(), 0);
}

#[test]
fn malformed_payloads_are_counted_and_the_rest_is_stored() {
    let pipeline = pipeline_with(InMemoryDocumentStore::new(), &["temperature"]);
    let batch = json!([
        payload("enviro-garden", 1),
        { "nickname": "enviro-garden", "readings": { "temperature": 1 } },
        { "nickname": "enviro-garden", "timestamp": "2023-09-29 08:03:00", "readings": { "humidity": 50 } },
        payload("enviro-garden", 4),
    ]);

    let report = pipeline.ingest(&batch).unwrap();
    assert_eq!(report.accepted, 2);
    assert_eq!(report.rejected_count(), 2);
    assert_eq!(report.rejected[0].index, 1);
    assert_eq!(report.rejected[0].reason, "missing timestamp");
    assert_eq!(report.rejected[1].index, 2);
    assert_eq!(report.rejected[1].reason, "missing required metric temperature");
    assert_eq!(pipeline.store().load_all().unwrap().len(), 2);
}

#[test]
fn firmware_string_values_are_stored_as_numbers() {
    let pipeline = pipeline();
    let body = br#"[{"nickname":"enviro-garden","timestamp":"2023-09-29 08:00:00","readings":{"temperature":"19.87","humidity":"61.3","voltage":""},"model":"urban","uid":"notused"}]"#;

    let report = pipeline.ingest_json(body).unwrap();
    assert_eq!(report.accepted, 1);
    let stored = pipeline.store().load_all().unwrap();
    assert_eq!(stored[0].field("temperature"), Some(19.87));
    assert_eq!(stored[0].field("voltage"), None);
}

#[test]
fn store_failure_fails_the_whole_batch() {
    let remote = InMemoryDocumentStore::new();
    let pipeline = pipeline_with(remote.clone(), &[]);
    remote.set_available(false);

    let err = pipeline
        .ingest(&json!([payload("enviro-garden", 1), payload("enviro-garden", 2)]))
        .unwrap_err();
    assert!(matches!(err, IngestError::Store(StoreError::RemoteUnavailable(_))));

    remote.set_available(true);
    assert!(pipeline.store().load_all().unwrap().is_empty());
}

#[test]
fn batches_roll_over_as_a_unit() {
    let remote = InMemoryDocumentStore::new();
    let store = ReadingsStore::new(
        remote.clone(),
        &StoreConfig {
            max_rows_per_shard: 3,
            ..StoreConfig::default()
        },
        SchemaNormalizer::new("enviro-garden"),
    );
    let pipeline = IngestPipeline::new(
        store,
        IngestConfig {
            accepted_source: "enviro-garden".into(),
            username: "u".into(),
            password: "p".into(),
            required_metrics: Vec::new(),
        },
    );

    pipeline
        .ingest(&json!([payload("enviro-garden", 1), payload("enviro-garden", 2)]))
        .unwrap();
    pipeline
        .ingest(&json!([payload("enviro-garden", 3), payload("enviro-garden", 4)]))
        .unwrap();

    let shards = pipeline.store().shard_summaries().unwrap();
    assert_eq!(shards.len(), 2);
    assert_eq!(shards[0].row_count, 2);
    assert_eq!(shards[1].row_count, 2);
    assert_eq!(pipeline.store().load_all().unwrap().len(), 4);
}

#[test]
fn metrics_named_like_columns_are_rejected_not_lost() {
    let remote = InMemoryDocumentStore::new();
    let pipeline = pipeline_with(remote.clone(), &[]);
    let batch = json!([
        {
            "nickname": "enviro-garden",
            "timestamp": "2023-09-29 08:00:00",
            "readings": { "temperature": 1, "source_id": 5, "nickname": 6, "": 7 }
        },
        payload("enviro-garden", 1),
    ]);

    let report = pipeline.ingest(&batch).unwrap();
    assert_eq!(report.accepted, 1);
    assert_eq!(report.rejected_count(), 1);
    assert_eq!(report.rejected[0].index, 0);

    let stored = pipeline.store().load_all().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].field("temperature"), Some(21.0));
}

#[test]
fn aliased_metrics_read_back_as_ingested() {
    let store = ReadingsStore::new(
        InMemoryDocumentStore::new(),
        &StoreConfig::default(),
        SchemaNormalizer::new("enviro-garden").with_alias("pm25", "pm2_5"),
    );
    let pipeline = IngestPipeline::new(
        store,
        IngestConfig {
            accepted_source: "enviro-garden".into(),
            username: "u".into(),
            password: "p".into(),
            required_metrics: Vec::new(),
        },
    );

    let report = pipeline
        .ingest(&json!({
            "nickname": "enviro-garden",
            "timestamp": "2023-09-29 08:00:00",
            "readings": { "pm25": 7.5, "humidity": 40 }
        }))
        .unwrap();
    assert_eq!(report.accepted, 1);

    let stored = pipeline.store().load_all().unwrap();
    assert_eq!(stored[0].field("pm2_5"), Some(7.5));
    assert_eq!(stored[0].fields.len(), 2);
}
