//! HTTP surface
//!
//! - `GET  /api/events`: active events in a viewport
//! - `POST /api/risk` (alias `/api/route-risk`): route risk score
//! - `GET  /api/health`: store and risk-surface health
//! - `/api/ingest*`: see [`crate::ingest_routes`]
//!
//! Every error is `{ "error": CODE, "message": ... }`.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use risk_engine::{EventQuery, EventQueryParams, EventView, HealthReport, QueryError, RiskError, RouteRisk, RouteRiskRequest};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::ingest_routes;
use crate::AppState;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(code = %self.code, "{}", self.message);
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.code, "message": self.message })),
        )
            .into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_BODY", rejection.body_text())
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Store(store) => Self::unavailable(store.to_string()),
            other => Self::validation(other.to_string()),
        }
    }
}

impl From<RiskError> for ApiError {
    fn from(e: RiskError) -> Self {
        match e {
            RiskError::Store(store) => Self::unavailable(store.to_string()),
            RiskError::RouteTooComplex { .. } => Self::new(StatusCode::BAD_REQUEST, "ROUTE_TOO_COMPLEX", e.to_string()),
            RiskError::RouteTooLong { .. } => Self::new(StatusCode::BAD_REQUEST, "ROUTE_TOO_LONG", e.to_string()),
            other => Self::validation(other.to_string()),
        }
    }
}

pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/events", get(list_events))
        .route("/risk", post(route_risk))
        .route("/route-risk", post(route_risk))
        .route("/health", get(health))
        .merge(ingest_routes::ingest_routes());

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<EventQueryParams>,
) -> Result<Json<Vec<EventView>>, ApiError> {
    let query = EventQuery::from_params(&params)?;
    let events = state.events.query_events(&query).await?;
    Ok(Json(events))
}

pub async fn route_risk(
    State(state): State<AppState>,
    body: Result<Json<RouteRiskRequest>, JsonRejection>,
) -> Result<Json<RouteRisk>, ApiError> {
    let Json(request) = body?;
    let risk = state
        .risk
        .calculate_route_risk(&request.coordinates, &request.city)
        .await?;
    Ok(Json(risk))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.health.check().await)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::AppState;
    use axum::body::Body;
    use axum::http::Request;
    use event_parser::SocialEventParser;
    use ingestion::IngestionConfig;
    use spatial_store::{Maintenance, MemoryStore};
    use std::sync::Arc;
    use tower::ServiceExt;

    pub(crate) fn test_state() -> (Arc<MemoryStore>, AppState) {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), SocialEventParser::heuristic(), IngestionConfig::default());
        (store, state)
    }

    pub(crate) async fn call(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub(crate) fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_events_require_bbox() {
        let (_, state) = test_state();
        let (status, body) = call(
            app(state),
            Request::get("/api/events?minLat=28.5&maxLat=28.8").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");
        assert!(body["message"].as_str().unwrap().contains("minLng"));
    }

    #[tokio::test]
    async fn test_ingested_event_is_queryable_and_scored() {
        let (store, state) = test_state();
        let app = app(state);

        let (status, _) = call(
            app.clone(),
            post_json(
                "/api/ingest",
                serde_json::json!({
                    "sourceId": "tw-1",
                    "lat": 28.6101,
                    "lng": 77.2041,
                    "eventType": "accident",
                    "severityHint": 4
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(
            app.clone(),
            Request::get("/api/events?minLat=28.5&maxLat=28.8&minLng=77.0&maxLng=77.4&eventTypes=accident")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["eventType"], "ACCIDENT");

        store.refresh_risk_surface(chrono::Utc::now()).await.unwrap();
        let (status, body) = call(
            app,
            post_json(
                "/api/route-risk",
                serde_json::json!({
                    "coordinates": [{ "lat": 28.6101, "lng": 77.2001 }, { "lat": 28.6101, "lng": 77.2101 }],
                    "city": "DEL"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["eventCount"], 1);
        assert_eq!(body["modelVersion"], 3);
        // raw 2.8 against k = 20
        assert_eq!(body["score"], 0.131);
        assert_eq!(body["level"], "LOW");
    }

    #[tokio::test]
    async fn test_risk_short_route_and_limits() {
        let (store, state) = test_state();
        store.set_parameter("MAX_ROUTE_VERTICES", 2.0).await;
        let app = app(state);

        let (status, body) = call(
            app.clone(),
            post_json("/api/risk", serde_json::json!({ "coordinates": [{ "lat": 28.61, "lng": 77.2 }], "city": "DEL" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["score"], 0.0);
        assert_eq!(body["level"], "LOW");

        let coords: Vec<_> = (0..3)
            .map(|i| serde_json::json!({ "lat": 28.61 + i as f64 * 0.001, "lng": 77.2 }))
            .collect();
        let (status, body) = call(
            app.clone(),
            post_json("/api/risk", serde_json::json!({ "coordinates": coords, "city": "DEL" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "ROUTE_TOO_COMPLEX");

        let (status, body) = call(
            app,
            Request::post("/api/risk")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_BODY");
    }

    #[tokio::test]
    async fn test_health_shape() {
        let (_, state) = test_state();
        let (status, body) = call(app(state), Request::get("/api/health").body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["db"], "up");
        assert_eq!(body["riskSurface"]["stale"], false);
        assert_eq!(body["riskSurface"]["maxAllowedSeconds"], 300);
    }
}
