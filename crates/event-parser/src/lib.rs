//! Social Event Parser
//!
//! Turns unstructured disruption reports into structured candidate events.
//! A pluggable [`EventExtractor`] is tried first; any failure there falls
//! through to the deterministic keyword heuristics in [`heuristics`].
//!
//! ```rust,ignore
//! let extractor: Option<Arc<dyn EventExtractor>> = match ChatCompletionConfig::from_env() {
//!     Some(config) => Some(Arc::new(ChatCompletionExtractor::new(config)?)),
//!     None => None,
//! };
//! let parser = SocialEventParser::new(extractor);
//! let parsed = parser.parse(&SocialPost::new("tw-1", "Accident at 28.61, 77.20")).await;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo_events::{clamp_severity, normalize_observed_at, Coordinate, EventType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub mod chat;
pub mod heuristics;

pub use chat::{ChatCompletionConfig, ChatCompletionExtractor};

/// Severity assumed when the extractor omits or garbles its hint.
const DEFAULT_EXTRACTED_SEVERITY: u8 = 2;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Extractor request failed: {0}")]
    Request(String),
    #[error("Extractor returned status {0}")]
    Status(u16),
    #[error("Extractor returned no content")]
    EmptyResponse,
    #[error("Extractor payload invalid: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialPost {
    pub source_id: String,
    pub observed_at: Option<String>,
    pub text: String,
}

impl SocialPost {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            observed_at: None,
            text: text.into(),
        }
    }
}

/// Raw fields as an extractor reports them, before normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedCandidate {
    pub lat: f64,
    pub lng: f64,
    pub event_type: Option<String>,
    pub severity_hint: Option<f64>,
    pub observed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParsedEvent {
    pub source_id: String,
    pub observed_at: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
    pub event_type: EventType,
    pub severity_hint: u8,
    pub text: String,
}

#[async_trait]
pub trait EventExtractor: Send + Sync {
    async fn extract(&self, post: &SocialPost) -> Result<ExtractedCandidate, ExtractError>;
}

/// Normalize an extractor candidate. `None` when its coordinates are unusable.
pub fn normalize_candidate(
    post: &SocialPost,
    candidate: ExtractedCandidate,
    now: DateTime<Utc>,
) -> Option<ParsedEvent> {
    let location = Coordinate::new(candidate.lat, candidate.lng).ok()?;

    let event_type = candidate
        .event_type
        .as_deref()
        .and_then(|t| EventType::parse_normalized(t).ok())
        .unwrap_or(EventType::HeavyTraffic);

    let severity_hint = match candidate.severity_hint {
        Some(hint) if hint.is_finite() => clamp_severity(hint),
        _ => DEFAULT_EXTRACTED_SEVERITY,
    };

    let observed_at = normalize_observed_at(
        candidate.observed_at.as_deref().or(post.observed_at.as_deref()),
        now,
    );

    Some(ParsedEvent {
        source_id: post.source_id.clone(),
        observed_at,
        lat: location.lat,
        lng: location.lng,
        event_type,
        severity_hint,
        text: post.text.trim().to_string(),
    })
}

#[derive(Clone, Default)]
pub struct SocialEventParser {
    extractor: Option<Arc<dyn EventExtractor>>,
}

impl SocialEventParser {
    pub fn new(extractor: Option<Arc<dyn EventExtractor>>) -> Self {
        Self { extractor }
    }

    /// Heuristic-only parser.
    pub fn heuristic() -> Self {
        Self { extractor: None }
    }

    pub fn has_extractor(&self) -> bool {
        self.extractor.is_some()
    }

    pub async fn parse(&self, post: &SocialPost) -> Option<ParsedEvent> {
        self.parse_at(post, Utc::now()).await
    }

    pub async fn parse_at(&self, post: &SocialPost, now: DateTime<Utc>) -> Option<ParsedEvent> {
        if let Some(extractor) = &self.extractor {
            match extractor.extract(post).await {
                Ok(candidate) => match normalize_candidate(post, candidate, now) {
                    Some(parsed) => return Some(parsed),
                    None => warn!(
                        source = %post.source_id,
                        "extractor produced invalid event payload; using heuristic parser"
                    ),
                },
                Err(e) => warn!(source = %post.source_id, "extractor failed: {}; using heuristic parser", e),
            }
        }

        let parsed = heuristics::parse(post, now);
        if parsed.is_none() {
            debug!(source = %post.source_id, "no event found in post");
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FixedExtractor(Result<(f64, f64, &'static str, Option<f64>), ()>);

    #[async_trait]
    impl EventExtractor for FixedExtractor {
        async fn extract(&self, _post: &SocialPost) -> Result<ExtractedCandidate, ExtractError> {
            match self.0 {
                Ok((lat, lng, event_type, severity_hint)) => Ok(ExtractedCandidate {
                    lat,
                    lng,
                    event_type: Some(event_type.to_string()),
                    severity_hint,
                    observed_at: None,
                }),
                Err(()) => Err(ExtractError::Status(503)),
            }
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 12, 9, 0, 0).unwrap()
    }

    fn parser_with(extractor: FixedExtractor) -> SocialEventParser {
        SocialEventParser::new(Some(Arc::new(extractor)))
    }

    #[tokio::test]
    async fn test_extractor_output_is_normalized() {
        let parser = parser_with(FixedExtractor(Ok((28.6, 77.2, "water_logging", Some(7.4)))));
        let parsed = parser
            .parse_at(&SocialPost::new("tw-1", "  knee deep water  "), now())
            .await
            .unwrap();

        assert_eq!(parsed.event_type, EventType::WaterLogging);
        assert_eq!(parsed.severity_hint, 5);
        assert_eq!(parsed.text, "knee deep water");
        assert_eq!(parsed.observed_at, now());
    }

    #[tokio::test]
    async fn test_unknown_type_and_missing_severity_use_defaults() {
        let parser = parser_with(FixedExtractor(Ok((28.6, 77.2, "alien landing", None))));
        let parsed = parser.parse_at(&SocialPost::new("tw-1", "??"), now()).await.unwrap();

        assert_eq!(parsed.event_type, EventType::HeavyTraffic);
        assert_eq!(parsed.severity_hint, 2);
    }

    #[tokio::test]
    async fn test_extractor_failure_falls_back_to_heuristics() {
        let parser = parser_with(FixedExtractor(Err(())));
        let parsed = parser
            .parse_at(&SocialPost::new("tw-1", "crash at 28.61, 77.20"), now())
            .await
            .unwrap();

        assert_eq!(parsed.event_type, EventType::Accident);
        assert_eq!(parsed.lat, 28.61);
    }

    #[tokio::test]
    async fn test_out_of_range_extraction_falls_back() {
        let parser = parser_with(FixedExtractor(Ok((128.6, 77.2, "ACCIDENT", Some(3.0)))));
        let parsed = parser
            .parse_at(&SocialPost::new("tw-1", "no coordinates here"), now())
            .await;

        assert!(parsed.is_none());
    }
}
