//! In-process store
//!
//! Reference engine for every store capability. Backs the gateway when no
//! external database is wired in and gives the services a real store to run
//! against in tests.

use crate::grid::cells_along;
use crate::{
    AdvisoryLocks, EventCandidate, EventFilter, EventLog, EventRepository, IngestionMetric,
    LogEntry, LogType, Maintenance, MaintenanceReport, NewLogEntry, OpType, ParameterSource,
    RawRouteRisk, Result, RiskCell, RiskSurface, StoreError, SurfaceReport, SystemState,
    SystemStateRegistry, UpsertOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo_events::geometry::DEFAULT_CELL_SIZE_DEG;
use geo_events::{haversine_km, Coordinate, EventStatus, GeoEvent, GridCell};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Grid resolution for risk cells
    pub cell_size_deg: f64,
    /// Same-type ACTIVE events closer than this are merged on upsert
    pub merge_radius_m: f64,
    /// Confidence halves every this many hours without a new observation
    pub decay_half_life_hours: f64,
    /// ACTIVE events whose confidence drops below this are archived
    pub archive_below_confidence: f64,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            cell_size_deg: DEFAULT_CELL_SIZE_DEG,
            merge_radius_m: 150.0,
            decay_half_life_hours: 6.0,
            archive_below_confidence: 0.2,
        }
    }
}

/// Event row plus the confidence it had at its last observation, which
/// decay is computed from.
#[derive(Debug, Clone)]
struct StoredEvent {
    event: GeoEvent,
    observed_confidence: f64,
}

#[derive(Default)]
struct Tables {
    events: Vec<StoredEvent>,
    log: Vec<LogEntry>,
    ingested_keys: HashMap<String, Uuid>,
    metrics: Vec<IngestionMetric>,
    cells: HashMap<(String, GridCell), RiskCell>,
    /// Last refresh, kept even when the surface came out empty.
    surface_refreshed_at: Option<DateTime<Utc>>,
    system_state: HashMap<String, SystemState>,
    parameters: HashMap<String, f64>,
}

pub struct MemoryStore {
    config: MemoryStoreConfig,
    tables: RwLock<Tables>,
    locks: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            tables: RwLock::new(Tables::default()),
            locks: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }

    /// Operator-side write of a model parameter row.
    pub async fn set_parameter(&self, key: impl Into<String>, value: f64) {
        self.tables.write().await.parameters.insert(key.into(), value);
    }

    pub async fn log_entries(&self) -> Vec<LogEntry> {
        self.tables.read().await.log.clone()
    }

    pub async fn events(&self) -> Vec<GeoEvent> {
        self.tables.read().await.events.iter().map(|s| s.event.clone()).collect()
    }

    pub async fn metrics(&self) -> Vec<IngestionMetric> {
        self.tables.read().await.metrics.clone()
    }

    pub async fn risk_cells(&self) -> Vec<RiskCell> {
        self.tables.read().await.cells.values().cloned().collect()
    }

    fn cell_for(&self, location: Coordinate) -> GridCell {
        GridCell::containing(location, self.config.cell_size_deg)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn blend_confidence(current: f64, incoming: f64) -> f64 {
    (current + incoming - current * incoming).clamp(0.0, 1.0)
}

#[async_trait]
impl EventLog for MemoryStore {
    async fn insert_ingested(&self, entry: NewLogEntry) -> Result<Option<Uuid>> {
        let key = entry.idempotency_key.clone().ok_or_else(|| {
            StoreError::Backend("INGESTED row requires an idempotency key".to_string())
        })?;

        let mut tables = self.tables.write().await;
        if tables.ingested_keys.contains_key(&key) {
            return Ok(None);
        }

        let id = Uuid::new_v4();
        tables.ingested_keys.insert(key, id);
        tables.log.push(LogEntry {
            id,
            entry: NewLogEntry {
                log_type: LogType::Ingested,
                ..entry
            },
            created_at: Utc::now(),
        });
        Ok(Some(id))
    }

    async fn append(&self, entry: NewLogEntry) -> Result<Uuid> {
        if entry.log_type == LogType::Ingested {
            return Err(StoreError::Backend(
                "INGESTED rows must go through insert_ingested".to_string(),
            ));
        }
        let id = Uuid::new_v4();
        self.tables.write().await.log.push(LogEntry {
            id,
            entry,
            created_at: Utc::now(),
        });
        Ok(id)
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    async fn upsert_event(&self, candidate: EventCandidate) -> Result<UpsertOutcome> {
        let merge_radius_km = self.config.merge_radius_m / 1000.0;
        let mut tables = self.tables.write().await;

        let existing = tables.events.iter_mut().find(|stored| {
            let e = &stored.event;
            e.is_active()
                && e.event_type == candidate.event_type
                && e.city_code == candidate.city_code
                && haversine_km(e.latitude, e.longitude, candidate.location.lat, candidate.location.lng)
                    <= merge_radius_km
        });

        if let Some(stored) = existing {
            stored.observed_confidence = blend_confidence(stored.observed_confidence, candidate.confidence);
            let event = &mut stored.event;
            event.confidence = stored.observed_confidence;
            event.severity = event.severity.max(candidate.severity);
            event.last_observed = event.last_observed.max(candidate.observed_at);
            event.expires_at = match (event.expires_at, candidate.expires_at) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            if candidate.description.is_some() {
                event.description = candidate.description;
            }
            debug!(event_id = %event.id, confidence = event.confidence, "merged report into existing event");
            return Ok(UpsertOutcome {
                event_id: event.id,
                op_type: OpType::Update,
            });
        }

        let event = GeoEvent {
            id: Uuid::new_v4(),
            event_type: candidate.event_type,
            severity: candidate.severity,
            confidence: candidate.confidence,
            status: EventStatus::Active,
            source_id: candidate.source_id,
            description: candidate.description,
            latitude: candidate.location.lat,
            longitude: candidate.location.lng,
            cell_id: self.cell_for(candidate.location),
            city_code: candidate.city_code,
            observed_at: candidate.observed_at,
            expires_at: candidate.expires_at,
            last_observed: candidate.observed_at,
        };
        let event_id = event.id;
        tables.events.push(StoredEvent {
            observed_confidence: event.confidence,
            event,
        });

        Ok(UpsertOutcome {
            event_id,
            op_type: OpType::Insert,
        })
    }

    async fn record_ingestion_metric(&self, metric: IngestionMetric) -> Result<()> {
        self.tables.write().await.metrics.push(metric);
        Ok(())
    }

    async fn active_events(&self, filter: &EventFilter) -> Result<Vec<GeoEvent>> {
        let tables = self.tables.read().await;

        let mut events: Vec<GeoEvent> = tables
            .events
            .iter()
            .map(|s| &s.event)
            .filter(|e| e.is_active())
            .filter(|e| filter.bbox.contains(e.latitude, e.longitude))
            .filter(|e| filter.city.as_ref().map_or(true, |city| &e.city_code == city))
            .filter(|e| filter.min_severity.map_or(true, |min| e.severity >= min))
            .filter(|e| {
                filter
                    .event_types
                    .as_ref()
                    .map_or(true, |types| types.iter().any(|t| t == e.event_type.as_str()))
            })
            .cloned()
            .collect();

        events.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.severity.cmp(&a.severity))
        });
        events.truncate(filter.limit);

        Ok(events)
    }
}

#[async_trait]
impl AdvisoryLocks for MemoryStore {
    async fn try_lock(&self, name: &str) -> Result<bool> {
        Ok(self.locks.lock().await.insert(name.to_string()))
    }

    async fn unlock(&self, name: &str) -> Result<()> {
        self.locks.lock().await.remove(name);
        Ok(())
    }
}

#[async_trait]
impl Maintenance for MemoryStore {
    async fn run_lifecycle_maintenance(&self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let half_life = self.config.decay_half_life_hours;
        let archive_below = self.config.archive_below_confidence;
        let mut report = MaintenanceReport::default();
        let mut tables = self.tables.write().await;

        for stored in tables.events.iter_mut().filter(|s| s.event.is_active()) {
            let event = &mut stored.event;

            if event.expires_at.is_some_and(|expires| expires <= now) {
                event.status = EventStatus::Expired;
                report.expired += 1;
                continue;
            }

            let age_hours = ((now - event.last_observed).num_milliseconds() as f64 / 3_600_000.0).max(0.0);
            let decayed = stored.observed_confidence * 0.5_f64.powf(age_hours / half_life);
            if decayed < event.confidence {
                event.confidence = decayed;
                report.decayed += 1;
            }

            if event.confidence < archive_below {
                event.status = EventStatus::Archived;
                report.archived += 1;
            }
        }

        Ok(report)
    }

    async fn refresh_risk_surface(&self, now: DateTime<Utc>) -> Result<SurfaceReport> {
        let mut tables = self.tables.write().await;
        let mut cells: HashMap<(String, GridCell), RiskCell> = HashMap::new();
        let mut events = 0;

        for event in tables.events.iter().map(|s| &s.event).filter(|e| e.is_active()) {
            events += 1;
            let cell = cells
                .entry((event.city_code.clone(), event.cell_id))
                .or_insert_with(|| RiskCell {
                    cell_id: event.cell_id,
                    city_code: event.city_code.clone(),
                    risk_value: 0.0,
                    event_count: 0,
                    updated_at: now,
                });
            cell.risk_value += event.severity as f64 * event.confidence;
            cell.event_count += 1;
        }

        let report = SurfaceReport {
            cells: cells.len(),
            events,
        };
        tables.cells = cells;
        tables.surface_refreshed_at = Some(now);
        Ok(report)
    }
}

#[async_trait]
impl SystemStateRegistry for MemoryStore {
    async fn set_system_state(&self, job: &str, state: SystemState) -> Result<()> {
        self.tables.write().await.system_state.insert(job.to_string(), state);
        Ok(())
    }

    async fn system_state(&self, job: &str) -> Result<Option<SystemState>> {
        Ok(self.tables.read().await.system_state.get(job).cloned())
    }
}

#[async_trait]
impl ParameterSource for MemoryStore {
    async fn model_parameters(&self) -> Result<HashMap<String, f64>> {
        Ok(self.tables.read().await.parameters.clone())
    }
}

#[async_trait]
impl RiskSurface for MemoryStore {
    async fn route_risk(&self, route: &[Coordinate], city: &str) -> Result<RawRouteRisk> {
        let route_cells = cells_along(route, self.config.cell_size_deg);
        let tables = self.tables.read().await;
        let mut risk = RawRouteRisk::default();

        for cell_id in route_cells {
            if let Some(cell) = tables.cells.get(&(city.to_string(), cell_id)) {
                risk.raw_score += cell.risk_value;
                risk.event_count += cell.event_count;
                risk.cell_count += 1;
            }
        }

        Ok(risk)
    }

    async fn latest_surface_update(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.tables.read().await.surface_refreshed_at)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
