//! Spatial Store
//!
//! Capabilities the disruption pipeline needs from its persistence engine,
//! split by concern so each service only depends on what it uses:
//!
//! - [`EventLog`]: append-only audit log with insert-if-absent on the
//!   INGESTED idempotency key
//! - [`EventRepository`]: event upsert, ingestion metrics, viewport reads
//! - [`AdvisoryLocks`]: named non-blocking try-lock / unlock
//! - [`Maintenance`]: lifecycle maintenance and risk surface refresh
//! - [`SystemStateRegistry`]: per-job status entries
//! - [`ParameterSource`]: operator-controlled model parameters
//! - [`RiskSurface`]: route scoring over materialized cells, freshness, ping
//!
//! [`MemoryStore`] implements all of them in-process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo_events::{BoundingBox, Coordinate, EventType, GeoEvent, GridCell};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

pub mod grid;
pub mod memory;

pub use memory::{MemoryStore, MemoryStoreConfig};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store operation failed: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Events log
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogType {
    Ingested,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLogEntry {
    pub log_type: LogType,
    pub source: String,
    pub source_ref: String,
    pub idempotency_key: Option<String>,
    pub parent_log_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    #[serde(flatten)]
    pub entry: NewLogEntry,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Insert an INGESTED row unless one with the same idempotency key exists.
    /// Returns the new row id, or `None` on conflict.
    async fn insert_ingested(&self, entry: NewLogEntry) -> Result<Option<Uuid>>;

    /// Append a PROCESSED or FAILED row unconditionally.
    async fn append(&self, entry: NewLogEntry) -> Result<Uuid>;
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpType {
    Insert,
    Update,
}

impl OpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Insert => "INSERT",
            OpType::Update => "UPDATE",
        }
    }
}

/// Normalized report ready to be merged into the event table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCandidate {
    pub event_type: EventType,
    pub severity: u8,
    pub confidence: f64,
    pub location: Coordinate,
    pub city_code: String,
    pub source_id: String,
    pub description: Option<String>,
    pub observed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UpsertOutcome {
    pub event_id: Uuid,
    pub op_type: OpType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionMetric {
    pub source_id: String,
    pub event_type: EventType,
    pub op_type: OpType,
    pub latency_ms: f64,
    pub city_code: String,
    pub recorded_at: DateTime<Utc>,
}

/// Viewport filter over the active-events projection.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub bbox: BoundingBox,
    pub city: Option<String>,
    pub min_severity: Option<u8>,
    pub event_types: Option<Vec<String>>,
    pub limit: usize,
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn upsert_event(&self, candidate: EventCandidate) -> Result<UpsertOutcome>;

    async fn record_ingestion_metric(&self, metric: IngestionMetric) -> Result<()>;

    /// ACTIVE events matching the filter, ordered by confidence then severity
    /// (both descending), at most `filter.limit` rows.
    async fn active_events(&self, filter: &EventFilter) -> Result<Vec<GeoEvent>>;
}

// ============================================================================
// Locks, maintenance, job status
// ============================================================================

#[async_trait]
pub trait AdvisoryLocks: Send + Sync {
    /// Non-blocking. `false` means another holder has it.
    async fn try_lock(&self, name: &str) -> Result<bool>;

    async fn unlock(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub decayed: usize,
    pub archived: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SurfaceReport {
    pub cells: usize,
    pub events: usize,
}

#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Expire, decay and archive events. Status only moves forward.
    async fn run_lifecycle_maintenance(&self, now: DateTime<Utc>) -> Result<MaintenanceReport>;

    /// Recompute every risk cell from the currently active events.
    async fn refresh_risk_surface(&self, now: DateTime<Utc>) -> Result<SurfaceReport>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemState {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SystemState {
    pub fn ok(duration_ms: f64, at: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Ok,
            duration_ms: Some(duration_ms),
            last_success_at: Some(at),
            last_failure_at: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Failed,
            duration_ms: None,
            last_success_at: None,
            last_failure_at: Some(at),
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait SystemStateRegistry: Send + Sync {
    /// Overwrites the entry for `job`.
    async fn set_system_state(&self, job: &str, state: SystemState) -> Result<()>;

    async fn system_state(&self, job: &str) -> Result<Option<SystemState>>;
}

// ============================================================================
// Parameters and the risk surface
// ============================================================================

#[async_trait]
pub trait ParameterSource: Send + Sync {
    /// Raw key/value rows of the model parameter table.
    async fn model_parameters(&self) -> Result<HashMap<String, f64>>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskCell {
    pub cell_id: GridCell,
    pub city_code: String,
    pub risk_value: f64,
    pub event_count: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RawRouteRisk {
    pub raw_score: f64,
    pub event_count: usize,
    pub cell_count: usize,
}

#[async_trait]
pub trait RiskSurface: Send + Sync {
    /// Aggregate risk of every materialized cell the route passes through.
    async fn route_risk(&self, route: &[Coordinate], city: &str) -> Result<RawRouteRisk>;

    /// Most recent cell update, `None` if the surface was never built.
    async fn latest_surface_update(&self) -> Result<Option<DateTime<Utc>>>;

    async fn ping(&self) -> Result<()>;
}
