//! Viewport event queries

use chrono::{DateTime, Utc};
use geo_events::{normalize_city_code, BoundingBox, EventStatus, EventType, GeoEvent, MAX_SEVERITY, MIN_SEVERITY};
use serde::{Deserialize, Serialize};
use spatial_store::{EventFilter, EventRepository, StoreError};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Hard cap on rows returned by one viewport query.
pub const MAX_EVENTS: usize = 2000;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("{0} is required")]
    MissingParameter(&'static str),
    #[error("{field} must be a number, got {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("{0}")]
    InvalidBoundingBox(String),
    #[error("city must be a three letter code, got {0:?}")]
    InvalidCity(String),
    #[error("minSeverity must be between 1 and 5, got {0:?}")]
    InvalidMinSeverity(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Query string as received, every field unparsed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQueryParams {
    pub min_lat: Option<String>,
    pub max_lat: Option<String>,
    pub min_lng: Option<String>,
    pub max_lng: Option<String>,
    pub city: Option<String>,
    pub event_types: Option<String>,
    pub min_severity: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub bbox: BoundingBox,
    pub city: Option<String>,
    pub min_severity: Option<u8>,
    /// Upper-cased names; unknown names simply match nothing
    pub event_types: Option<Vec<String>>,
}

fn required_number(field: &'static str, value: &Option<String>) -> Result<f64, QueryError> {
    let raw = value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(QueryError::MissingParameter(field))?;
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| QueryError::InvalidNumber {
            field,
            value: raw.to_string(),
        })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl EventQuery {
    pub fn from_params(params: &EventQueryParams) -> Result<Self, QueryError> {
        let bbox = BoundingBox::new(
            required_number("minLat", &params.min_lat)?,
            required_number("maxLat", &params.max_lat)?,
            required_number("minLng", &params.min_lng)?,
            required_number("maxLng", &params.max_lng)?,
        )
        .map_err(|e| QueryError::InvalidBoundingBox(e.to_string()))?;

        let city = non_empty(&params.city)
            .map(|c| normalize_city_code(c).map_err(|_| QueryError::InvalidCity(c.to_string())))
            .transpose()?;

        let min_severity = non_empty(&params.min_severity)
            .map(|s| {
                s.parse::<u8>()
                    .ok()
                    .filter(|v| (MIN_SEVERITY..=MAX_SEVERITY).contains(v))
                    .ok_or_else(|| QueryError::InvalidMinSeverity(s.to_string()))
            })
            .transpose()?;

        let event_types = non_empty(&params.event_types).map(|types| {
            types
                .split(',')
                .map(|t| t.trim().to_uppercase())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        });

        Ok(Self {
            bbox,
            city,
            min_severity,
            event_types,
        })
    }
}

/// Wire shape of one event in a viewport response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub id: Uuid,
    pub event_type: EventType,
    pub severity: u8,
    pub confidence: f64,
    pub status: EventStatus,
    pub lat: f64,
    pub lng: f64,
    pub city_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub observed_at: DateTime<Utc>,
    pub last_observed: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<GeoEvent> for EventView {
    fn from(event: GeoEvent) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type,
            severity: event.severity,
            confidence: event.confidence,
            status: event.status,
            lat: event.latitude,
            lng: event.longitude,
            city_code: event.city_code,
            description: event.description,
            observed_at: event.observed_at,
            last_observed: event.last_observed,
            expires_at: event.expires_at,
        }
    }
}

pub struct EventQueryService {
    events: Arc<dyn EventRepository>,
}

impl EventQueryService {
    pub fn new(events: Arc<dyn EventRepository>) -> Self {
        Self { events }
    }

    /// Active events in the viewport, highest confidence first.
    pub async fn query_events(&self, query: &EventQuery) -> Result<Vec<EventView>, QueryError> {
        let filter = EventFilter {
            bbox: query.bbox,
            city: query.city.clone(),
            min_severity: query.min_severity,
            event_types: query.event_types.clone(),
            limit: MAX_EVENTS,
        };

        let events = self.events.active_events(&filter).await?;
        Ok(events.into_iter().map(EventView::from).collect())
    }
}
