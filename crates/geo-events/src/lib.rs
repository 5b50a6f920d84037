//! Geo Events Library
//!
//! Shared model for urban disruption reports: event types and lifecycle
//! status, validated coordinates, viewport bounding boxes and the fixed
//! resolution grid used to bucket events into risk cells.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod geometry;
pub mod time;

pub use geometry::{approx_route_length_km, haversine_km, BoundingBox, Coordinate, GridCell};
pub use time::{canonical_timestamp, normalize_observed_at};

/// Confidence assigned to a freshly ingested report.
pub const INITIAL_CONFIDENCE: f64 = 0.7;

pub const MIN_SEVERITY: u8 = 1;
pub const MAX_SEVERITY: u8 = 5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeoError {
    #[error("Invalid coordinates: lat={lat}, lng={lng}")]
    InvalidCoordinates { lat: f64, lng: f64 },
    #[error("Unsupported event type: {0}")]
    UnsupportedEventType(String),
    #[error("Invalid city code: {0}")]
    InvalidCityCode(String),
    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(String),
}

pub type Result<T> = std::result::Result<T, GeoError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Accident,
    Construction,
    MetroWork,
    WaterLogging,
    Protest,
    HeavyTraffic,
    RoadBlock,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::Accident,
        EventType::Construction,
        EventType::MetroWork,
        EventType::WaterLogging,
        EventType::Protest,
        EventType::HeavyTraffic,
        EventType::RoadBlock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Accident => "ACCIDENT",
            EventType::Construction => "CONSTRUCTION",
            EventType::MetroWork => "METRO_WORK",
            EventType::WaterLogging => "WATER_LOGGING",
            EventType::Protest => "PROTEST",
            EventType::HeavyTraffic => "HEAVY_TRAFFIC",
            EventType::RoadBlock => "ROAD_BLOCK",
        }
    }

    /// Parse a loosely formatted type name (case and surrounding whitespace ignored).
    pub fn parse_normalized(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_uppercase();
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or(GeoError::UnsupportedEventType(normalized))
    }

    /// How long a report of this type stays active without being re-observed.
    pub fn default_ttl(&self) -> chrono::Duration {
        match self {
            EventType::Accident => chrono::Duration::hours(2),
            EventType::Construction => chrono::Duration::days(30),
            EventType::MetroWork => chrono::Duration::days(90),
            EventType::WaterLogging => chrono::Duration::hours(12),
            EventType::Protest => chrono::Duration::hours(6),
            EventType::HeavyTraffic => chrono::Duration::hours(1),
            EventType::RoadBlock => chrono::Duration::hours(24),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self> {
        EventType::parse_normalized(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Active,
    Expired,
    Archived,
}

/// Clamp a severity hint into [1, 5], rounding to the nearest integer.
pub fn clamp_severity(value: f64) -> u8 {
    if value.is_nan() {
        return MIN_SEVERITY;
    }
    value.round().clamp(MIN_SEVERITY as f64, MAX_SEVERITY as f64) as u8
}

/// Normalize a city partition key. Must be three ASCII letters.
pub fn normalize_city_code(raw: &str) -> Result<String> {
    let code = raw.trim().to_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(GeoError::InvalidCityCode(raw.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoEvent {
    pub id: Uuid,
    pub event_type: EventType,
    pub severity: u8,
    pub confidence: f64,
    pub status: EventStatus,
    pub source_id: String,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub city_code: String,
    pub observed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_observed: DateTime<Utc>,
    pub cell_id: GridCell,
}

impl GeoEvent {
    pub fn location(&self) -> Coordinate {
        Coordinate {
            lat: self.latitude,
            lng: self.longitude,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == EventStatus::Active
    }
}
