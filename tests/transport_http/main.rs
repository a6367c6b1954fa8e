//! HTTP transport integration tests.
//!
//! Starts an axum server and exercises it with reqwest.

#![cfg(feature = "http")]

use std::sync::Arc;

use enviro_readings::remote::InMemoryDocumentStore;
use enviro_readings::{http, IngestConfig, IngestPipeline, ReadingsStore, SchemaNormalizer, StoreConfig};
use serde_json::{json, Value};

fn pipeline(remote: InMemoryDocumentStore) -> Arc<IngestPipeline<InMemoryDocumentStore>> {
    let store = ReadingsStore::new(
        remote,
        &StoreConfig::default(),
        SchemaNormalizer::new("enviro-garden"),
    );
    Arc::new(IngestPipeline::new(
        store,
        IngestConfig {
            accepted_source: "enviro-garden".into(),
            username: "enviro".into(),
            password: "secret".into(),
            required_metrics: Vec::new(),
        },
    ))
}

/// Bind to port 0 and return the actual address.
async fn start_server(remote: InMemoryDocumentStore) -> String {
    let app = http::router(pipeline(remote));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn payload(source: &str, minute: u32) -> Value {
    json!({
        "nickname": source,
        "timestamp": format!("2023-09-29T08:{:02}:00Z", minute),
        "readings": { "temperature": 18.5, "humidity": 60.0 },
        "model": "urban",
        "uid": "notused"
    })
}

#[tokio::test]
async fn health_check() {
    let base = start_server(InMemoryDocumentStore::new()).await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn wrong_credentials_are_rejected_without_writing() {
    let remote = InMemoryDocumentStore::new();
    let base = start_server(remote.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/envirodata"))
        .basic_auth("enviro", Some("guess"))
        .json(&payload("enviro-garden", 0))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(resp.text().await.unwrap(), "Authentication failed");

    let resp = client
        .post(format!("{base}/envirodata"))
        .json(&payload("enviro-garden", 0))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    assert_eq!(remote.replace_count(), 0);
}

#[tokio::test]
async fn post_batch_then_read_back() {
    let base = start_server(InMemoryDocumentStore::new()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/envirodata"))
        .basic_auth("enviro", Some("secret"))
        .json(&json!([
            payload("enviro-garden", 1),
            payload("enviro-kitchen", 2),
            payload("enviro-garden", 3),
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["saved"], 2);
    assert_eq!(body["filtered"], 1);
    assert_eq!(body["rejected"], json!([]));
    assert_eq!(body["message"], "2 readings saved for: enviro-garden");

    let readings: Value = client
        .get(format!("{base}/readings"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let readings = readings.as_array().unwrap();
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0]["source_id"], "enviro-garden");
    assert_eq!(readings[0]["fields"]["temperature"], 18.5);
    assert_eq!(readings[1]["timestamp"], "2023-09-29T08:03:00Z");

    let shards: Value = client
        .get(format!("{base}/shards"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(shards, json!([{ "name": "readings.csv", "row_count": 2 }]));
}

#[tokio::test]
async fn rejected_payloads_are_reported() {
    let base = start_server(InMemoryDocumentStore::new()).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/envirodata"))
        .basic_auth("enviro", Some("secret"))
        .json(&json!([
            payload("enviro-garden", 1),
            { "nickname": "enviro-garden", "timestamp": "2023-09-29T08:02:00Z" },
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["saved"], 1);
    assert_eq!(
        body["rejected"],
        json!([{ "index": 1, "reason": "missing readings object" }])
    );
}

#[tokio::test]
async fn unparseable_body_is_bad_request() {
    let base = start_server(InMemoryDocumentStore::new()).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/envirodata"))
        .basic_auth("enviro", Some("secret"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn store_outage_is_a_generic_failure() {
    let remote = InMemoryDocumentStore::new();
    let base = start_server(remote.clone()).await;
    remote.set_available(false);

    let resp = reqwest::Client::new()
        .post(format!("{base}/envirodata"))
        .basic_auth("enviro", Some("secret"))
        .json(&payload("enviro-garden", 1))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Unknown failure");
}
