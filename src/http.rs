//! HTTP transport - maps inbound requests onto the ingest pipeline and store.
//!
//! Requires the `http` feature. Uses axum for routing. Store calls block, so
//! they run on tokio's blocking pool.
//!
//! ## Routes
//!
//! - `POST /envirodata`: ingest one payload or an array of payloads. HTTP
//!   Basic auth; 401 without touching the store when it does not match.
//! - `GET /readings`: every stored reading, oldest shard first.
//! - `GET /shards`: shard names with row counts.
//! - `GET /health`: `{ "ok": true }`.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use enviro_readings::{http, IngestPipeline};
//!
//! let pipeline = Arc::new(IngestPipeline::new(store, config.ingest.clone()));
//! http::serve(pipeline, "0.0.0.0:8050").await?;
//! ```

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info, warn};

use crate::ingest::{BasicCredentials, IngestError, IngestPipeline};
use crate::remote::DocumentStore;

/// Build an axum `Router` over the given pipeline.
pub fn router<D: DocumentStore + 'static>(pipeline: Arc<IngestPipeline<D>>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/envirodata", post(ingest_handler::<D>))
        .route("/readings", get(readings_handler::<D>))
        .route("/shards", get(shards_handler::<D>))
        .with_state(pipeline)
}

/// Serve the pipeline over HTTP at the given address (e.g. `"0.0.0.0:8050"`).
pub async fn serve<D: DocumentStore + 'static>(
    pipeline: Arc<IngestPipeline<D>>,
    addr: &str,
) -> Result<(), std::io::Error> {
    let app = router(pipeline);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app).await
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

/// `POST /envirodata`
async fn ingest_handler<D: DocumentStore + 'static>(
    State(pipeline): State<Arc<IngestPipeline<D>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let credentials = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(BasicCredentials::from_authorization_header);

    if let Err(e) = pipeline.authenticate(credentials.as_ref()) {
        warn!(
            user = credentials.as_ref().map(|c| c.username.as_str()),
            "rejected ingest request"
        );
        return (
            StatusCode::UNAUTHORIZED,
            [(WWW_AUTHENTICATE, "Basic realm=\"envirodata\"")],
            e.to_string(),
        )
            .into_response();
    }

    let worker = Arc::clone(&pipeline);
    let outcome = tokio::task::spawn_blocking(move || worker.ingest_json(&body)).await;

    match outcome {
        Ok(Ok(report)) => {
            info!(
                saved = report.accepted,
                filtered = report.filtered,
                rejected = report.rejected_count(),
                "ingested batch"
            );
            let message = format!(
                "{} readings saved for: {}",
                report.accepted,
                pipeline.accepted_source()
            );
            (
                StatusCode::OK,
                Json(json!({
                    "saved": report.accepted,
                    "filtered": report.filtered,
                    "rejected": report.rejected,
                    "message": message,
                })),
            )
                .into_response()
        }
        Ok(Err(e)) => ingest_error_response(&e),
        Err(e) => {
            error!(error = %e, "ingest task failed");
            unknown_failure()
        }
    }
}

/// `GET /readings`
async fn readings_handler<D: DocumentStore + 'static>(
    State(pipeline): State<Arc<IngestPipeline<D>>>,
) -> Response {
    let outcome = tokio::task::spawn_blocking(move || pipeline.store().load_all()).await;
    match outcome {
        Ok(Ok(readings)) => (StatusCode::OK, Json(readings)).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "loading readings failed");
            unknown_failure()
        }
        Err(e) => {
            error!(error = %e, "load task failed");
            unknown_failure()
        }
    }
}

/// `GET /shards`
async fn shards_handler<D: DocumentStore + 'static>(
    State(pipeline): State<Arc<IngestPipeline<D>>>,
) -> Response {
    let outcome = tokio::task::spawn_blocking(move || pipeline.store().shard_summaries()).await;
    match outcome {
        Ok(Ok(shards)) => (StatusCode::OK, Json(shards)).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "listing shards failed");
            unknown_failure()
        }
        Err(e) => {
            error!(error = %e, "shard task failed");
            unknown_failure()
        }
    }
}

fn ingest_error_response(e: &IngestError) -> Response {
    match e {
        IngestError::Store(inner) => {
            error!(error = %inner, "batch not stored");
            unknown_failure()
        }
        other => {
            let status =
                StatusCode::from_u16(other.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
            (status, Json(json!({ "error": other.to_string() }))).into_response()
        }
    }
}

fn unknown_failure() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Unknown failure" })),
    )
        .into_response()
}
