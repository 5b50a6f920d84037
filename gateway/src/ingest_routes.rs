//! Ingestion endpoints
//!
//! Single reports answer with a status code derived from the outcome:
//! SUCCESS 201, DUPLICATE 200, REJECTED 400, FAILED 503. Batches always
//! answer 200 with one result per input, in order.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use event_parser::SocialPost;
use ingestion::{IngestionResult, IngestionStatus, RawEvent};
use serde::Serialize;
use tracing::debug;

use crate::routes::ApiError;
use crate::AppState;

pub fn ingest_routes() -> Router<AppState> {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/ingest/batch", post(ingest_batch))
        .route("/ingest/queue", post(ingest_queued))
        .route("/ingest/social", post(ingest_social))
}

#[derive(Serialize)]
pub struct Accepted {
    pub accepted: bool,
}

fn respond(result: IngestionResult) -> Response {
    match result.status {
        IngestionStatus::Success => (StatusCode::CREATED, Json(result)).into_response(),
        IngestionStatus::Duplicate => (StatusCode::OK, Json(result)).into_response(),
        IngestionStatus::Rejected => ApiError::new(
            StatusCode::BAD_REQUEST,
            result.reason.clone().unwrap_or_else(|| "REJECTED".to_string()),
            "Event rejected by validation",
        )
        .into_response(),
        IngestionStatus::Failed => ApiError::unavailable(
            result.reason.unwrap_or_else(|| "ingestion failed".to_string()),
        )
        .into_response(),
    }
}

pub async fn ingest(
    State(state): State<AppState>,
    body: Result<Json<RawEvent>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(event) = body?;
    Ok(respond(state.ingestion.ingest(event).await))
}

pub async fn ingest_batch(
    State(state): State<AppState>,
    body: Result<Json<Vec<RawEvent>>, JsonRejection>,
) -> Result<Json<Vec<IngestionResult>>, ApiError> {
    let Json(batch) = body?;
    Ok(Json(state.ingestion.ingest_batch(batch).await))
}

/// Hand the event to the buffered queue and return before it is written.
pub async fn ingest_queued(
    State(state): State<AppState>,
    body: Result<Json<RawEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let Json(event) = body?;
    let source_id = event.source_id.clone();
    state
        .queue
        .submit(event)
        .await
        .map_err(|e| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "QUEUE_CLOSED", e.to_string()))?;
    debug!(source = %source_id, "queued for batch ingestion");
    Ok((StatusCode::ACCEPTED, Json(Accepted { accepted: true })))
}

pub async fn ingest_social(
    State(state): State<AppState>,
    body: Result<Json<SocialPost>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(post) = body?;
    Ok(respond(state.ingestion.ingest_social(post).await))
}

#[cfg(test)]
mod tests {
    use crate::routes::app;
    use crate::routes::tests::{call, post_json, test_state};
    use axum::http::StatusCode;
    use serde_json::json;

    fn report(source_id: &str) -> serde_json::Value {
        json!({
            "sourceId": source_id,
            "observedAt": "2026-10-16T08:00:00Z",
            "lat": 28.6139,
            "lng": 77.2090,
            "eventType": "water_logging",
            "severityHint": 3,
            "text": "Water logging at ITO"
        })
    }

    #[tokio::test]
    async fn test_single_ingest_status_codes() {
        let (_, state) = test_state();
        let app = app(state);

        let (status, body) = call(app.clone(), post_json("/api/ingest", report("tw-9"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "SUCCESS");
        assert_eq!(body["opType"], "INSERT");

        let (status, body) = call(app.clone(), post_json("/api/ingest", report("tw-9"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "DUPLICATE");
        assert_eq!(body["reason"], "IDEMPOTENT_HIT");

        let mut missing = report("tw-10");
        missing["lat"] = serde_json::Value::Null;
        let (status, body) = call(app, post_json("/api/ingest", missing)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "MISSING_GEOMETRY");
    }

    #[tokio::test]
    async fn test_batch_keeps_input_order() {
        let (store, state) = test_state();
        let mut unsupported = report("tw-2");
        unsupported["eventType"] = json!("alien_landing");

        let (status, body) = call(
            app(state),
            post_json("/api/ingest/batch", json!([report("tw-1"), unsupported, report("tw-1")])),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let results = body.as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["status"], "SUCCESS");
        assert_eq!(results[1]["reason"], "UNSUPPORTED_EVENT_TYPE");
        assert_eq!(results[2]["status"], "DUPLICATE");
        assert_eq!(store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_social_post_is_parsed_and_ingested() {
        let (store, state) = test_state();
        let app = app(state);

        let (status, body) = call(
            app.clone(),
            post_json(
                "/api/ingest/social",
                json!({ "sourceId": "tw-77", "text": "Major accident blocking lanes at 28.6139, 77.2090" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "SUCCESS");
        assert_eq!(store.events().await.len(), 1);

        let (status, body) = call(
            app,
            post_json("/api/ingest/social", json!({ "sourceId": "tw-78", "text": "lovely weather today" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "UNPARSABLE_POST");
    }

    #[tokio::test]
    async fn test_queue_accepts_and_malformed_body_is_rejected() {
        let (_, state) = test_state();
        let app = app(state);

        let (status, body) = call(app.clone(), post_json("/api/ingest/queue", report("tw-5"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["accepted"], true);

        let (status, body) = call(app, post_json("/api/ingest", json!({ "lat": 28.6 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_BODY");
    }
}
