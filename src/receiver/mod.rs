//! The receiving service.
//!
//! A thin axum layer over [`DestStore`]: parse the delivery metadata headers,
//! hand the body stream to the store, and map each failure mode to a distinct
//! HTTP status.

pub mod store;

pub use store::{DeliveryMeta, DestStore};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use courier_types::{
    DeliveryResponse, ReceiveError, FINGERPRINT_HEADER, SEQUENCE_HEADER, SIZE_HEADER,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Create the receiver router.
pub fn router(store: Arc<DestStore>) -> Router {
    Router::new()
        .route("/files/*path", post(deliver_file))
        .route("/healthz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

/// POST /files/{*path} - accept one delivery and persist it atomically.
async fn deliver_file(
    State(store): State<Arc<DestStore>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<DeliveryResponse>, (StatusCode, String)> {
    let meta = parse_meta(&headers).map_err(|reason| (StatusCode::BAD_REQUEST, reason))?;

    match store.store(&path, meta, body.into_data_stream()).await {
        Ok(status) => Ok(Json(DeliveryResponse { status })),
        Err(e) => Err(map_receive_error(&path, e)),
    }
}

fn parse_meta(headers: &HeaderMap) -> Result<DeliveryMeta, String> {
    let fingerprint = header_value(headers, FINGERPRINT_HEADER)?;
    let size_bytes = header_value(headers, SIZE_HEADER)?
        .parse::<u64>()
        .map_err(|_| format!("header '{}' is not a valid size", SIZE_HEADER))?;
    let sequence = header_value(headers, SEQUENCE_HEADER)?
        .parse::<u64>()
        .map_err(|_| format!("header '{}' is not a valid sequence", SEQUENCE_HEADER))?;
    Ok(DeliveryMeta {
        fingerprint,
        size_bytes,
        sequence,
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Result<String, String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .ok_or_else(|| format!("missing or invalid header '{}'", name))
}

fn map_receive_error(path: &str, e: ReceiveError) -> (StatusCode, String) {
    let status = match &e {
        ReceiveError::PathBusy(_) => StatusCode::SERVICE_UNAVAILABLE,
        ReceiveError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    if status.is_server_error() {
        error!("Delivery for '{}' failed: {}", path, e);
    } else {
        warn!("Delivery for '{}' rejected: {}", path, e);
    }
    (status, e.to_string())
}
