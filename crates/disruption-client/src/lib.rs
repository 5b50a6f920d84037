//! Disruption Gateway Client
//!
//! Typed HTTP client for the gateway's query and ingestion endpoints.
//! Transport-level failures (timeouts, refused or dropped connections) are
//! retried under a [`RetryPolicy`]; HTTP error statuses never are.

use event_parser::SocialPost;
use geo_events::{BoundingBox, Coordinate};
use ingestion::{IngestionResult, RawEvent};
use risk_engine::{EventView, HealthReport, RouteRisk, RouteRiskRequest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub mod retry;
pub mod viewport;

pub use retry::{retry, RetryPolicy};
pub use viewport::{GenerationTicket, RequestGeneration, ViewportTracker};

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Could not connect: {0}")]
    Connect(String),
    #[error("Connection dropped: {0}")]
    ConnectionDropped(String),
    #[error("{code} ({status}): {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },
    #[error("Could not decode response: {0}")]
    Decode(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Superseded by a newer request")]
    Superseded,
}

impl ClientError {
    /// Worth another attempt: the request may never have reached the server.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout(_) | ClientError::Connect(_) | ClientError::ConnectionDropped(_)
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout(e.to_string())
        } else if e.is_connect() {
            ClientError::Connect(e.to_string())
        } else if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else if e.is_request() || e.is_body() {
            ClientError::ConnectionDropped(e.to_string())
        } else {
            ClientError::Request(e.to_string())
        }
    }
}

/// Error body the gateway returns with any non-2xx status.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
}

/// Viewport query with its optional filters.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportQuery {
    pub bbox: BoundingBox,
    pub city: Option<String>,
    pub event_types: Vec<String>,
    pub min_severity: Option<u8>,
}

impl ViewportQuery {
    pub fn new(bbox: BoundingBox) -> Self {
        Self {
            bbox,
            city: None,
            event_types: Vec::new(),
            min_severity: None,
        }
    }

    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("minLat", self.bbox.min_lat.to_string()),
            ("maxLat", self.bbox.max_lat.to_string()),
            ("minLng", self.bbox.min_lng.to_string()),
            ("maxLng", self.bbox.max_lng.to_string()),
        ];
        if let Some(city) = &self.city {
            pairs.push(("city", city.clone()));
        }
        if !self.event_types.is_empty() {
            pairs.push(("eventTypes", self.event_types.join(",")));
        }
        if let Some(min) = self.min_severity {
            pairs.push(("minSeverity", min.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone)]
pub struct DisruptionClient {
    base_url: String,
    http: reqwest::Client,
    retry_policy: RetryPolicy,
}

impl DisruptionClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            retry_policy: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn fetch_events(&self, query: &ViewportQuery) -> Result<Vec<EventView>, ClientError> {
        let url = self.url("/api/events");
        let pairs = query.query_pairs();
        retry(&self.retry_policy, || async {
            let response = self.http.get(&url).query(&pairs).send().await?;
            decode(response).await
        })
        .await
    }

    /// Fetch a viewport, discarding the answer if a newer request began
    /// while this one was in flight.
    pub async fn fetch_events_latest(
        &self,
        query: &ViewportQuery,
        ticket: &GenerationTicket,
    ) -> Result<Vec<EventView>, ClientError> {
        let events = self.fetch_events(query).await?;
        if !ticket.is_current() {
            debug!(generation = ticket.value(), "dropping superseded viewport response");
            return Err(ClientError::Superseded);
        }
        Ok(events)
    }

    pub async fn route_risk(&self, coordinates: Vec<Coordinate>, city: &str) -> Result<RouteRisk, ClientError> {
        let body = RouteRiskRequest {
            coordinates,
            city: city.to_string(),
        };
        self.post_json("/api/risk", &body).await
    }

    pub async fn health(&self) -> Result<HealthReport, ClientError> {
        let url = self.url("/api/health");
        retry(&self.retry_policy, || async {
            let response = self.http.get(&url).send().await?;
            decode(response).await
        })
        .await
    }

    pub async fn ingest(&self, event: &RawEvent) -> Result<IngestionResult, ClientError> {
        self.post_json("/api/ingest", event).await
    }

    pub async fn ingest_social(&self, post: &SocialPost) -> Result<IngestionResult, ClientError> {
        self.post_json("/api/ingest/social", post).await
    }

    /// Ingestion is idempotent on the server, so replaying a POST after a
    /// dropped connection is safe.
    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        retry(&self.retry_policy, || async {
            let response = self.http.post(&url).json(body).send().await?;
            decode(response).await
        })
        .await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.error, body.message),
        Err(_) => ("HTTP_ERROR".to_string(), text),
    };
    Err(ClientError::Status {
        status: status.as_u16(),
        code,
        message,
    })
}
