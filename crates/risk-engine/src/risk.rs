//! Route risk queries

use crate::params::ModelParameters;
use crate::scoring::{classify, normalize_score, round3, RiskLevel, MODEL_VERSION};
use geo_events::{approx_route_length_km, Coordinate};
use serde::{Deserialize, Serialize};
use spatial_store::{ParameterSource, RiskSurface, StoreError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Invalid coordinate: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },
    #[error("City is required")]
    MissingCity,
    #[error("Route too complex: {vertices} vertices exceeds limit of {max}")]
    RouteTooComplex { vertices: usize, max: usize },
    #[error("Route too long: {distance_km:.1} km exceeds limit of {max_km} km")]
    RouteTooLong { distance_km: f64, max_km: f64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRiskRequest {
    #[serde(default)]
    pub coordinates: Vec<Coordinate>,
    #[serde(default)]
    pub city: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteRisk {
    pub score: f64,
    pub level: RiskLevel,
    pub event_count: usize,
    pub latency_ms: f64,
    pub model_version: u32,
}

pub struct RiskQueryService {
    params: Arc<dyn ParameterSource>,
    surface: Arc<dyn RiskSurface>,
}

impl RiskQueryService {
    pub fn new(params: Arc<dyn ParameterSource>, surface: Arc<dyn RiskSurface>) -> Self {
        Self { params, surface }
    }

    pub async fn calculate_route_risk(
        &self,
        coordinates: &[Coordinate],
        city: &str,
    ) -> Result<RouteRisk, RiskError> {
        let started = Instant::now();

        if coordinates.len() < 2 {
            return Ok(RouteRisk {
                score: 0.0,
                level: RiskLevel::Low,
                event_count: 0,
                latency_ms: elapsed_ms(started),
                model_version: MODEL_VERSION,
            });
        }

        let params = ModelParameters::load(self.params.as_ref()).await?;

        if let Some(bad) = coordinates.iter().find(|c| !c.is_valid()) {
            return Err(RiskError::InvalidCoordinate {
                lat: bad.lat,
                lng: bad.lng,
            });
        }

        let city = city.trim().to_uppercase();
        if city.is_empty() {
            return Err(RiskError::MissingCity);
        }

        if coordinates.len() > params.max_route_vertices {
            return Err(RiskError::RouteTooComplex {
                vertices: coordinates.len(),
                max: params.max_route_vertices,
            });
        }

        let distance_km = approx_route_length_km(coordinates);
        if distance_km > params.max_route_distance_km {
            return Err(RiskError::RouteTooLong {
                distance_km,
                max_km: params.max_route_distance_km,
            });
        }

        let raw = self.surface.route_risk(coordinates, &city).await?;
        let normalized = normalize_score(raw.raw_score, params.sigmoid_k);
        let level = classify(normalized);
        let score = round3(normalized);

        debug!(
            city = %city,
            raw = raw.raw_score,
            cells = raw.cell_count,
            score,
            "route scored"
        );

        Ok(RouteRisk {
            score,
            level,
            event_count: raw.event_count,
            latency_ms: elapsed_ms(started),
            model_version: MODEL_VERSION,
        })
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    round3(started.elapsed().as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use spatial_store::RawRouteRisk;
    use std::collections::HashMap;

    /// Fixed parameter rows and a fixed raw score.
    struct Fixture {
        rows: HashMap<String, f64>,
        raw: RawRouteRisk,
    }

    impl Fixture {
        fn service(rows: &[(&str, f64)], raw_score: f64, event_count: usize) -> RiskQueryService {
            let fixture = Arc::new(Fixture {
                rows: rows.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                raw: RawRouteRisk {
                    raw_score,
                    event_count,
                    cell_count: event_count,
                },
            });
            RiskQueryService::new(fixture.clone(), fixture)
        }
    }

    #[async_trait]
    impl ParameterSource for Fixture {
        async fn model_parameters(&self) -> spatial_store::Result<HashMap<String, f64>> {
            Ok(self.rows.clone())
        }
    }

    #[async_trait]
    impl RiskSurface for Fixture {
        async fn route_risk(&self, _route: &[Coordinate], _city: &str) -> spatial_store::Result<RawRouteRisk> {
            Ok(self.raw)
        }

        async fn latest_surface_update(&self) -> spatial_store::Result<Option<DateTime<Utc>>> {
            Ok(None)
        }

        async fn ping(&self) -> spatial_store::Result<()> {
            Ok(())
        }
    }

    fn route(points: usize) -> Vec<Coordinate> {
        (0..points)
            .map(|i| Coordinate {
                lat: 28.61 + i as f64 * 0.01,
                lng: 77.2 + i as f64 * 0.01,
            })
            .collect()
    }

    fn reference_rows() -> Vec<(&'static str, f64)> {
        vec![
            ("SIGMOID_K", 20.0),
            ("MAX_ROUTE_VERTICES", 5.0),
            ("MAX_ROUTE_DISTANCE_KM", 50.0),
        ]
    }

    #[tokio::test]
    async fn test_short_route_is_low_for_any_city() {
        let service = Fixture::service(&reference_rows(), 20.0, 4);
        for city in ["DEL", "", "???"] {
            let risk = service.calculate_route_risk(&route(1), city).await.unwrap();
            assert_eq!(risk.score, 0.0);
            assert_eq!(risk.level, RiskLevel::Low);
            assert_eq!(risk.event_count, 0);
        }
    }

    #[tokio::test]
    async fn test_normalizes_raw_surface_score() {
        let service = Fixture::service(&reference_rows(), 20.0, 4);
        let risk = service.calculate_route_risk(&route(2), "DEL").await.unwrap();

        assert_eq!(risk.score, 0.632);
        assert_eq!(risk.level, RiskLevel::Medium);
        assert_eq!(risk.event_count, 4);
        assert_eq!(risk.model_version, 3);
    }

    #[tokio::test]
    async fn test_vertex_limit() {
        let service = Fixture::service(&reference_rows(), 20.0, 4);
        assert!(service.calculate_route_risk(&route(5), "DEL").await.is_ok());

        let err = service.calculate_route_risk(&route(6), "DEL").await.unwrap_err();
        assert!(matches!(err, RiskError::RouteTooComplex { vertices: 6, max: 5 }));
        assert!(err.to_string().contains("Route too complex"));
    }

    #[tokio::test]
    async fn test_distance_limit() {
        let service = Fixture::service(&[("MAX_ROUTE_DISTANCE_KM", 1.0)], 0.0, 0);
        // 0.01 deg diagonal steps: ~1.57 km per segment
        let err = service.calculate_route_risk(&route(2), "DEL").await.unwrap_err();
        assert!(matches!(err, RiskError::RouteTooLong { .. }));
    }

    #[tokio::test]
    async fn test_input_validation() {
        let service = Fixture::service(&[], 0.0, 0);

        let mut bad = route(2);
        bad[1].lat = 91.0;
        assert!(matches!(
            service.calculate_route_risk(&bad, "DEL").await,
            Err(RiskError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            service.calculate_route_risk(&route(2), "  ").await,
            Err(RiskError::MissingCity)
        ));
    }

    #[tokio::test]
    async fn test_high_risk() {
        let service = Fixture::service(&[], 60.0, 9);
        let risk = service.calculate_route_risk(&route(3), "del").await.unwrap();
        assert_eq!(risk.score, 0.95);
        assert_eq!(risk.level, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_level_uses_unrounded_score() {
        // 1 - e^(-24.05/20) = 0.69955, which rounds to 0.7
        let service = Fixture::service(&reference_rows(), 24.05, 5);
        let risk = service.calculate_route_risk(&route(3), "DEL").await.unwrap();
        assert_eq!(risk.score, 0.7);
        assert_eq!(risk.level, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn test_against_memory_store() {
        use geo_events::EventType;
        use spatial_store::{EventCandidate, EventRepository, Maintenance, MemoryStore};

        let store = Arc::new(MemoryStore::new());
        for (lng, severity) in [(77.2041, 4), (77.2081, 5)] {
            store
                .upsert_event(EventCandidate {
                    event_type: EventType::Accident,
                    severity,
                    confidence: 0.7,
                    location: Coordinate { lat: 28.6101, lng },
                    city_code: "DEL".to_string(),
                    source_id: "tw-1".to_string(),
                    description: None,
                    observed_at: Utc::now(),
                    expires_at: None,
                })
                .await
                .unwrap();
        }
        store.refresh_risk_surface(Utc::now()).await.unwrap();

        let service = RiskQueryService::new(store.clone(), store);
        let route = [
            Coordinate { lat: 28.6101, lng: 77.2001 },
            Coordinate { lat: 28.6101, lng: 77.2101 },
        ];
        let risk = service.calculate_route_risk(&route, "DEL").await.unwrap();

        // raw 6.3 against k = 20
        assert_eq!(risk.score, 0.27);
        assert_eq!(risk.level, RiskLevel::Low);
        assert_eq!(risk.event_count, 2);
    }
}
