//! Ingestion Service
//!
//! Validates raw disruption reports, deduplicates them through the
//! INGESTED audit row, merges them into the event table and records the
//! PROCESSED / FAILED trail plus an ingestion metric.
//!
//! ## Flow
//!
//! ```text
//! RawEvent ─▶ validate ─▶ fingerprint ─▶ INGESTED (insert-if-absent)
//!                │                              │ conflict → DUPLICATE
//!                ▼                              ▼
//!            REJECTED                 upsert ─▶ PROCESSED ─▶ metric
//!                                               │ error → FAILED row
//! ```

use chrono::{DateTime, Utc};
use event_parser::{ParsedEvent, SocialEventParser, SocialPost};
use geo_events::{
    canonical_timestamp, clamp_severity, normalize_city_code, normalize_observed_at, Coordinate,
    EventType, INITIAL_CONFIDENCE,
};
use serde::{Deserialize, Serialize};
use spatial_store::{
    EventCandidate, EventLog, EventRepository, IngestionMetric, LogType, NewLogEntry, OpType,
    StoreError,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

pub mod fingerprint;
pub mod queue;

pub use fingerprint::fingerprint;
pub use queue::{IngestionQueue, QueueError};

/// Raw report as submitted by a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub source_id: String,
    #[serde(default)]
    pub observed_at: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    pub event_type: String,
    #[serde(default)]
    pub severity_hint: Option<f64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub city_code: Option<String>,
}

impl From<ParsedEvent> for RawEvent {
    fn from(parsed: ParsedEvent) -> Self {
        Self {
            source_id: parsed.source_id,
            observed_at: Some(canonical_timestamp(parsed.observed_at)),
            lat: Some(parsed.lat),
            lng: Some(parsed.lng),
            event_type: parsed.event_type.as_str().to_string(),
            severity_hint: Some(parsed.severity_hint as f64),
            text: Some(parsed.text),
            city_code: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestionStatus {
    Success,
    Rejected,
    Duplicate,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    MissingGeometry,
    OutOfRangeGeometry,
    UnsupportedEventType,
    InvalidCityCode,
    UnparsablePost,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingGeometry => "MISSING_GEOMETRY",
            RejectReason::OutOfRangeGeometry => "OUT_OF_RANGE_GEOMETRY",
            RejectReason::UnsupportedEventType => "UNSUPPORTED_EVENT_TYPE",
            RejectReason::InvalidCityCode => "INVALID_CITY_CODE",
            RejectReason::UnparsablePost => "UNPARSABLE_POST",
        }
    }
}

pub const IDEMPOTENT_HIT: &str = "IDEMPOTENT_HIT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResult {
    pub status: IngestionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op_type: Option<OpType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl IngestionResult {
    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            status: IngestionStatus::Rejected,
            reason: Some(reason.as_str().to_string()),
            event_id: None,
            op_type: None,
            log_id: None,
            idempotency_key: None,
        }
    }

    fn duplicate(key: String) -> Self {
        Self {
            status: IngestionStatus::Duplicate,
            reason: Some(IDEMPOTENT_HIT.to_string()),
            event_id: None,
            op_type: None,
            log_id: None,
            idempotency_key: Some(key),
        }
    }

    fn failed(message: String, key: String) -> Self {
        Self {
            status: IngestionStatus::Failed,
            reason: Some(message),
            event_id: None,
            op_type: None,
            log_id: None,
            idempotency_key: Some(key),
        }
    }
}

/// Report that passed validation, with every field normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    pub source_id: String,
    pub observed_at: DateTime<Utc>,
    pub location: Coordinate,
    pub event_type: EventType,
    pub severity: u8,
    pub text: Option<String>,
    pub city_code: String,
}

impl ValidatedEvent {
    fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "sourceId": self.source_id,
            "observedAt": canonical_timestamp(self.observed_at),
            "lat": self.location.lat,
            "lng": self.location.lng,
            "eventType": self.event_type,
            "severity": self.severity,
            "text": self.text,
            "cityCode": self.city_code,
        })
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Source label written on every audit row
    pub source: String,
    /// City used when a report carries none
    pub default_city: String,
    pub batch_size: usize,
    pub flush_window: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            source: "TWITTER".to_string(),
            default_city: "DEL".to_string(),
            batch_size: 100,
            flush_window: Duration::from_secs(1),
        }
    }
}

/// Validation in order: geometry, type, city. First failure wins.
pub fn validate(
    raw: &RawEvent,
    default_city: &str,
    now: DateTime<Utc>,
) -> Result<ValidatedEvent, RejectReason> {
    let (lat, lng) = match (raw.lat, raw.lng) {
        (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite() => (lat, lng),
        _ => return Err(RejectReason::MissingGeometry),
    };
    let location = Coordinate::new(lat, lng).map_err(|_| RejectReason::OutOfRangeGeometry)?;

    let event_type =
        EventType::parse_normalized(&raw.event_type).map_err(|_| RejectReason::UnsupportedEventType)?;

    let city = raw
        .city_code
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or(default_city);
    let city_code = normalize_city_code(city).map_err(|_| RejectReason::InvalidCityCode)?;

    Ok(ValidatedEvent {
        source_id: raw.source_id.trim().to_string(),
        observed_at: normalize_observed_at(raw.observed_at.as_deref(), now),
        location,
        event_type,
        severity: raw.severity_hint.map(clamp_severity).unwrap_or(1),
        text: raw
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
        city_code,
    })
}

pub struct IngestionService {
    log: Arc<dyn EventLog>,
    events: Arc<dyn EventRepository>,
    parser: SocialEventParser,
    config: IngestionConfig,
}

impl IngestionService {
    pub fn new(
        log: Arc<dyn EventLog>,
        events: Arc<dyn EventRepository>,
        parser: SocialEventParser,
        config: IngestionConfig,
    ) -> Self {
        Self {
            log,
            events,
            parser,
            config,
        }
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    pub async fn ingest(&self, raw: RawEvent) -> IngestionResult {
        self.ingest_at(raw, Utc::now()).await
    }

    pub async fn ingest_at(&self, raw: RawEvent, now: DateTime<Utc>) -> IngestionResult {
        let event = match validate(&raw, &self.config.default_city, now) {
            Ok(event) => event,
            Err(reason) => {
                info!(status = "REJECTED", source = %raw.source_id, reason = reason.as_str(), "[INGEST]");
                return IngestionResult::rejected(reason);
            }
        };

        let key = fingerprint(&event);
        let payload = event.payload();

        let ingested = self
            .log
            .insert_ingested(self.log_entry(LogType::Ingested, &event, &key, None, payload.clone()))
            .await;

        let log_id = match ingested {
            Ok(Some(id)) => id,
            Ok(None) => {
                info!(status = "DUPLICATE", source = %event.source_id, "[INGEST]");
                return IngestionResult::duplicate(key);
            }
            Err(e) => return self.fail(&event, key, payload, e).await,
        };

        let started = Instant::now();
        match self.process(&event, &key, log_id, payload.clone(), started).await {
            Ok((event_id, op_type)) => {
                info!(
                    status = "SUCCESS",
                    source = %event.source_id,
                    op = op_type.as_str(),
                    event_type = event.event_type.as_str(),
                    "[INGEST]"
                );
                IngestionResult {
                    status: IngestionStatus::Success,
                    reason: None,
                    event_id: Some(event_id),
                    op_type: Some(op_type),
                    log_id: Some(log_id),
                    idempotency_key: Some(key),
                }
            }
            Err(e) => self.fail(&event, key, payload, e).await,
        }
    }

    /// Sequential, input order preserved.
    pub async fn ingest_batch(&self, batch: Vec<RawEvent>) -> Vec<IngestionResult> {
        let started = Instant::now();
        let size = batch.len();
        let mut results = Vec::with_capacity(size);
        for raw in batch {
            results.push(self.ingest(raw).await);
        }
        info!(
            size,
            duration_ms = started.elapsed().as_millis() as u64,
            "[INGEST] BATCH complete"
        );
        results
    }

    pub async fn ingest_social(&self, post: SocialPost) -> IngestionResult {
        match self.parser.parse(&post).await {
            Some(parsed) => self.ingest(parsed.into()).await,
            None => {
                info!(status = "REJECTED", source = %post.source_id, reason = "UNPARSABLE_POST", "[INGEST]");
                IngestionResult::rejected(RejectReason::UnparsablePost)
            }
        }
    }

    async fn process(
        &self,
        event: &ValidatedEvent,
        key: &str,
        log_id: Uuid,
        payload: serde_json::Value,
        started: Instant,
    ) -> Result<(Uuid, OpType), StoreError> {
        let outcome = self
            .events
            .upsert_event(EventCandidate {
                event_type: event.event_type,
                severity: event.severity,
                confidence: INITIAL_CONFIDENCE,
                location: event.location,
                city_code: event.city_code.clone(),
                source_id: event.source_id.clone(),
                description: event.text.clone(),
                observed_at: event.observed_at,
                expires_at: Some(event.observed_at + event.event_type.default_ttl()),
            })
            .await?;

        let mut processed = self.log_entry(LogType::Processed, event, key, Some(log_id), payload);
        processed.payload["eventId"] = serde_json::json!(outcome.event_id);
        processed.payload["opType"] = serde_json::json!(outcome.op_type);
        self.log.append(processed).await?;

        self.events
            .record_ingestion_metric(IngestionMetric {
                source_id: event.source_id.clone(),
                event_type: event.event_type,
                op_type: outcome.op_type,
                latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                city_code: event.city_code.clone(),
                recorded_at: Utc::now(),
            })
            .await?;

        Ok((outcome.event_id, outcome.op_type))
    }

    async fn fail(
        &self,
        event: &ValidatedEvent,
        key: String,
        payload: serde_json::Value,
        error: StoreError,
    ) -> IngestionResult {
        let message = error.to_string();
        warn!(status = "FAILED", source = %event.source_id, error = %message, "[INGEST]");

        let mut failed = self.log_entry(LogType::Failed, event, &key, None, payload);
        failed.error_message = Some(message.clone());
        if let Err(e) = self.log.append(failed).await {
            warn!("could not write FAILED audit row: {}", e);
        }

        IngestionResult::failed(message, key)
    }

    fn log_entry(
        &self,
        log_type: LogType,
        event: &ValidatedEvent,
        key: &str,
        parent_log_id: Option<Uuid>,
        payload: serde_json::Value,
    ) -> NewLogEntry {
        NewLogEntry {
            log_type,
            source: self.config.source.clone(),
            source_ref: event.source_id.clone(),
            idempotency_key: Some(key.to_string()),
            parent_log_id,
            payload,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use geo_events::GeoEvent;
    use proptest::prelude::*;
    use spatial_store::{EventFilter, MemoryStore, UpsertOutcome};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 12, 9, 0, 0).unwrap()
    }

    fn raw(lat: f64, lng: f64, event_type: &str) -> RawEvent {
        RawEvent {
            source_id: "tw-100".to_string(),
            observed_at: Some("2026-02-12T08:55:00Z".to_string()),
            lat: Some(lat),
            lng: Some(lng),
            event_type: event_type.to_string(),
            severity_hint: Some(3.0),
            text: Some("crash near ITO".to_string()),
            city_code: None,
        }
    }

    fn service(store: Arc<MemoryStore>) -> IngestionService {
        IngestionService::new(
            store.clone(),
            store,
            SocialEventParser::heuristic(),
            IngestionConfig::default(),
        )
    }

    struct UnavailableRepository;

    #[async_trait]
    impl EventRepository for UnavailableRepository {
        async fn upsert_event(&self, _candidate: EventCandidate) -> spatial_store::Result<UpsertOutcome> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn record_ingestion_metric(&self, _metric: IngestionMetric) -> spatial_store::Result<()> {
            Ok(())
        }

        async fn active_events(&self, _filter: &EventFilter) -> spatial_store::Result<Vec<GeoEvent>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_same_event_twice_is_success_then_duplicate() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());

        let first = service.ingest_at(raw(28.61, 77.20, "accident"), now()).await;
        let second = service.ingest_at(raw(28.61, 77.20, "ACCIDENT "), now()).await;

        assert_eq!(first.status, IngestionStatus::Success);
        assert_eq!(first.op_type, Some(OpType::Insert));
        assert_eq!(second.status, IngestionStatus::Duplicate);
        assert_eq!(second.reason.as_deref(), Some(IDEMPOTENT_HIT));
        assert_eq!(first.idempotency_key, second.idempotency_key);

        assert_eq!(store.events().await.len(), 1);
        assert_eq!(store.metrics().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicates_ingest_once() {
        let store = Arc::new(MemoryStore::new());
        let service = Arc::new(service(store.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.ingest_at(raw(28.61, 77.20, "accident"), now()).await })
            })
            .collect();

        let mut statuses = Vec::new();
        for handle in handles {
            statuses.push(handle.await.unwrap().status);
        }

        let successes = statuses.iter().filter(|s| **s == IngestionStatus::Success).count();
        let duplicates = statuses.iter().filter(|s| **s == IngestionStatus::Duplicate).count();
        assert_eq!(successes, 1);
        assert_eq!(duplicates, 15);

        let ingested = store
            .log_entries()
            .await
            .iter()
            .filter(|e| e.entry.log_type == LogType::Ingested)
            .count();
        assert_eq!(ingested, 1);
        assert_eq!(store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_success_writes_audit_trail() {
        let store = Arc::new(MemoryStore::new());
        let result = service(store.clone()).ingest_at(raw(28.61, 77.20, "PROTEST"), now()).await;

        let log = store.log_entries().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].entry.log_type, LogType::Ingested);
        assert_eq!(log[1].entry.log_type, LogType::Processed);
        assert_eq!(log[1].entry.parent_log_id, result.log_id);
        assert_eq!(log[0].entry.source, "TWITTER");

        let event = &store.events().await[0];
        assert_eq!(event.confidence, INITIAL_CONFIDENCE);
        assert_eq!(event.severity, 3);
        assert_eq!(event.city_code, "DEL");
        assert_eq!(
            event.expires_at,
            Some(Utc.with_ymd_and_hms(2026, 2, 12, 14, 55, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_nearby_report_is_an_update() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());

        service.ingest_at(raw(28.6100, 77.2000, "ACCIDENT"), now()).await;
        let mut nearby = raw(28.6103, 77.2001, "ACCIDENT");
        nearby.source_id = "tw-101".to_string();
        let result = service.ingest_at(nearby, now()).await;

        assert_eq!(result.status, IngestionStatus::Success);
        assert_eq!(result.op_type, Some(OpType::Update));
        assert_eq!(store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_order() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());

        let mut missing = raw(28.61, 77.20, "BOGUS");
        missing.lat = None;
        assert_eq!(
            service.ingest_at(missing, now()).await.reason.as_deref(),
            Some("MISSING_GEOMETRY")
        );

        let nan = raw(f64::NAN, 77.20, "ACCIDENT");
        assert_eq!(service.ingest_at(nan, now()).await.reason.as_deref(), Some("MISSING_GEOMETRY"));

        let bad_type = raw(28.61, 77.20, "ALIENS");
        assert_eq!(
            service.ingest_at(bad_type, now()).await.reason.as_deref(),
            Some("UNSUPPORTED_EVENT_TYPE")
        );

        let mut bad_city = raw(28.61, 77.20, "ACCIDENT");
        bad_city.city_code = Some("DELHI".to_string());
        assert_eq!(
            service.ingest_at(bad_city, now()).await.reason.as_deref(),
            Some("INVALID_CITY_CODE")
        );

        assert!(store.log_entries().await.is_empty());
        assert!(store.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_writes_failed_row() {
        let store = Arc::new(MemoryStore::new());
        let service = IngestionService::new(
            store.clone(),
            Arc::new(UnavailableRepository),
            SocialEventParser::heuristic(),
            IngestionConfig::default(),
        );

        let result = service.ingest_at(raw(28.61, 77.20, "ACCIDENT"), now()).await;
        assert_eq!(result.status, IngestionStatus::Failed);
        assert!(result.reason.as_deref().unwrap().contains("connection refused"));

        let log = store.log_entries().await;
        assert_eq!(log.len(), 2);
        let failed = &log[1].entry;
        assert_eq!(failed.log_type, LogType::Failed);
        assert_eq!(failed.idempotency_key, result.idempotency_key);
        assert!(failed.error_message.is_some());
        assert_eq!(failed.payload["eventType"], "ACCIDENT");
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let store = Arc::new(MemoryStore::new());
        let results = service(store)
            .ingest_batch(vec![
                raw(28.61, 77.20, "ACCIDENT"),
                raw(128.61, 77.20, "ACCIDENT"),
                raw(28.61, 77.20, "ACCIDENT"),
            ])
            .await;

        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![IngestionStatus::Success, IngestionStatus::Rejected, IngestionStatus::Duplicate]
        );
    }

    #[tokio::test]
    async fn test_social_post_paths() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());

        let ok = service
            .ingest_social(SocialPost::new("tw-7", "Accident near ITO 28.61, 77.20 heavy jam"))
            .await;
        assert_eq!(ok.status, IngestionStatus::Success);
        let event = &store.events().await[0];
        assert_eq!(event.event_type, EventType::Accident);
        assert_eq!(event.severity, 4);

        let unparsable = service.ingest_social(SocialPost::new("tw-8", "traffic is bad today")).await;
        assert_eq!(unparsable.status, IngestionStatus::Rejected);
        assert_eq!(unparsable.reason.as_deref(), Some("UNPARSABLE_POST"));
    }

    fn out_of_range() -> impl Strategy<Value = (f64, f64)> {
        prop_oneof![
            (90.0001f64..1000.0, -180.0f64..180.0),
            (-1000.0f64..-90.0001, -180.0f64..180.0),
            (-90.0f64..90.0, 180.0001f64..1000.0),
            (-90.0f64..90.0, -1000.0f64..-180.0001),
        ]
    }

    proptest! {
        #[test]
        fn prop_out_of_range_is_rejected_without_mutation((lat, lng) in out_of_range()) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let store = Arc::new(MemoryStore::new());
            let result = runtime.block_on(service(store.clone()).ingest_at(raw(lat, lng, "ACCIDENT"), now()));

            prop_assert_eq!(result.status, IngestionStatus::Rejected);
            prop_assert_eq!(result.reason.as_deref(), Some("OUT_OF_RANGE_GEOMETRY"));
            prop_assert!(runtime.block_on(store.log_entries()).is_empty());
            prop_assert!(runtime.block_on(store.events()).is_empty());
        }
    }
}
