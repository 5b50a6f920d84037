//! Store-resident model parameters

use spatial_store::{ParameterSource, StoreError};
use std::collections::HashMap;
use tracing::debug;

pub const SIGMOID_K: &str = "SIGMOID_K";
pub const MAX_ROUTE_VERTICES: &str = "MAX_ROUTE_VERTICES";
pub const MAX_ROUTE_DISTANCE_KM: &str = "MAX_ROUTE_DISTANCE_KM";
pub const MATERIALIZATION_STALE_SECONDS: &str = "MATERIALIZATION_STALE_SECONDS";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelParameters {
    /// Raw score at which the normalized score reaches 1 - 1/e
    pub sigmoid_k: f64,
    pub max_route_vertices: usize,
    pub max_route_distance_km: f64,
    pub materialization_stale_seconds: i64,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            sigmoid_k: 20.0,
            max_route_vertices: 1000,
            max_route_distance_km: 50.0,
            materialization_stale_seconds: 300,
        }
    }
}

impl ModelParameters {
    /// Build from raw rows. Missing, non-finite or non-positive values keep
    /// their defaults.
    pub fn from_rows(rows: &HashMap<String, f64>) -> Self {
        let defaults = Self::default();
        let positive = |key: &str| {
            let value = rows.get(key).copied().filter(|v| v.is_finite() && *v > 0.0);
            if value.is_none() && rows.contains_key(key) {
                debug!(key, "ignoring unusable model parameter");
            }
            value
        };

        Self {
            sigmoid_k: positive(SIGMOID_K).unwrap_or(defaults.sigmoid_k),
            max_route_vertices: positive(MAX_ROUTE_VERTICES)
                .map(|v| v.floor() as usize)
                .unwrap_or(defaults.max_route_vertices),
            max_route_distance_km: positive(MAX_ROUTE_DISTANCE_KM)
                .unwrap_or(defaults.max_route_distance_km),
            materialization_stale_seconds: positive(MATERIALIZATION_STALE_SECONDS)
                .map(|v| v.floor() as i64)
                .unwrap_or(defaults.materialization_stale_seconds),
        }
    }

    pub async fn load(source: &dyn ParameterSource) -> Result<Self, StoreError> {
        Ok(Self::from_rows(&source.model_parameters().await?))
    }
}
