//! HTTP API: notification ingestion and health check

use crate::delivery::{BatchOutcome, DeliveryEngine};
use crate::models::{DestinationId, NotificationPayload, RelayConfig};
use bytes::Buf;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::{Filter, Reply};

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub ingest_enabled: bool,
}

/// Create HTTP API routes.
///
/// The ingestion route exists only when a destination is configured;
/// otherwise requests to it get warp's default 404.
pub fn create_api_routes(
    config: &RelayConfig,
    engine: DeliveryEngine,
) -> BoxedFilter<(Box<dyn Reply>,)> {
    let ingest_enabled = config.destination.is_some();

    // GET /health - Health check endpoint
    let get_health = warp::path!("health")
        .and(warp::get())
        .map(move || -> Box<dyn Reply> {
            Box::new(warp::reply::json(&HealthResponse {
                status: "ok".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ingest_enabled,
            }))
        })
        .boxed();

    match &config.destination {
        Some(destination) => {
            let post_ingest = create_ingest_route(
                config.ingest_path.clone(),
                config.max_body_bytes,
                destination.clone(),
                engine,
            );
            get_health.or(post_ingest).unify().boxed()
        }
        None => get_health,
    }
}

/// Why an ingestion body was refused before any delivery
#[derive(Debug)]
enum BodyError {
    TooLarge,
    Read(warp::Error),
}

/// POST /<ingest_path> - Deliver a JSON array of notifications
fn create_ingest_route(
    ingest_path: String,
    max_body_bytes: u64,
    destination: DestinationId,
    engine: DeliveryEngine,
) -> BoxedFilter<(Box<dyn Reply>,)> {
    let destination = Arc::new(destination);
    let destination_filter = warp::any().map(move || Arc::clone(&destination));
    let engine_filter = warp::any().map(move || engine.clone());

    // Streamed so chunked uploads without Content-Length are accepted too
    warp::path(ingest_path)
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::header::optional::<u64>("content-length"))
        .and(warp::body::stream())
        .and(destination_filter)
        .and(engine_filter)
        .and_then(
            move |content_length: Option<u64>, body, destination, engine| async move {
                let bytes = match read_body(content_length, body, max_body_bytes).await {
                    Ok(bytes) => bytes,
                    Err(BodyError::TooLarge) => {
                        tracing::warn!(
                            max_body_bytes = max_body_bytes,
                            "Notification batch body too large"
                        );
                        let status: Box<dyn Reply> = Box::new(StatusCode::PAYLOAD_TOO_LARGE);
                        return Ok::<_, warp::Rejection>(status);
                    }
                    Err(BodyError::Read(e)) => {
                        tracing::warn!(error = %e, "Failed to read notification batch body");
                        return Ok(Box::new(StatusCode::BAD_REQUEST) as Box<dyn Reply>);
                    }
                };

                let batch: Vec<NotificationPayload> = match serde_json::from_slice(&bytes) {
                    Ok(batch) => batch,
                    Err(e) => {
                        tracing::warn!(error = %e, "Notification batch is not a JSON array");
                        return Ok(Box::new(StatusCode::BAD_REQUEST) as Box<dyn Reply>);
                    }
                };

                handle_post_ingest(batch, destination, engine).await
            },
        )
        .boxed()
}

/// Collect a request body, refusing it once it grows past `limit` bytes.
async fn read_body<S, B>(
    content_length: Option<u64>,
    body: S,
    limit: u64,
) -> Result<Vec<u8>, BodyError>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    if content_length.map_or(false, |len| len > limit) {
        return Err(BodyError::TooLarge);
    }

    futures_util::pin_mut!(body);
    let mut collected = Vec::new();
    while let Some(chunk) = body.next().await {
        let mut chunk = chunk.map_err(BodyError::Read)?;
        if (collected.len() + chunk.remaining()) as u64 > limit {
            return Err(BodyError::TooLarge);
        }
        while chunk.has_remaining() {
            let read = {
                let part = chunk.chunk();
                collected.extend_from_slice(part);
                part.len()
            };
            chunk.advance(read);
        }
    }

    Ok(collected)
}

/// Handle POST /<ingest_path>
///
/// The only response is 200 once the whole batch was accepted. A batch that
/// cannot finish (shutdown mid-retry, crashed delivery task) never gets an
/// answer: the caller sees the connection time out or drop.
async fn handle_post_ingest(
    batch: Vec<NotificationPayload>,
    destination: Arc<DestinationId>,
    engine: DeliveryEngine,
) -> Result<Box<dyn Reply>, warp::Rejection> {
    let request_id = Uuid::new_v4();
    let batch_size = batch.len();
    tracing::info!(
        request_id = %request_id,
        batch_size = batch_size,
        "Received notification batch"
    );

    // Delivery runs in its own task so a client hanging up does not abandon
    // the rest of the batch.
    let delivery =
        tokio::spawn(async move { engine.deliver_batch(&destination, &batch).await });

    match delivery.await {
        Ok(BatchOutcome::Completed {
            delivered,
            attempts,
        }) => {
            tracing::info!(
                request_id = %request_id,
                delivered = delivered,
                attempts = attempts,
                "Notification batch delivered"
            );
            return Ok(Box::new(StatusCode::OK));
        }
        Ok(BatchOutcome::Cancelled { delivered, pending }) => {
            tracing::warn!(
                request_id = %request_id,
                delivered = delivered,
                pending = pending,
                "Shutting down with notifications still undelivered"
            );
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Delivery task failed");
        }
    }

    // Hold the request open until the process exits and drops the connection
    let never: Infallible = std::future::pending().await;
    match never {}
}
