//! Inbound HTTP surface: one path, method-dispatched.
//!
//! * `GET`/`HEAD ?hub.challenge=…` echoes the token (400 without it),
//! * `POST` runs the delivery pipeline and answers 204.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;

use crate::signature::HEADER_SIGNATURE;
use crate::webhook::{answer_challenge, DeliveryError, Pipeline};

pub fn router(pipeline: Arc<Pipeline>, endpoint: &str) -> Router {
    Router::new()
        .route(endpoint, get(challenge).post(deliver))
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}

async fn challenge(Query(q): Query<HashMap<String, String>>) -> Result<String, DeliveryError> {
    answer_challenge(q.get("hub.challenge").map(String::as_str))
}

async fn deliver(
    State(pipeline): State<Arc<Pipeline>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, DeliveryError> {
    let signature = headers
        .get(HEADER_SIGNATURE)
        .and_then(|v| v.to_str().ok());
    tracing::debug!(target: "webhook", bytes = body.len(), "delivery received");

    pipeline.deliver(signature, &body).await?;
    Ok(StatusCode::NO_CONTENT)
}
