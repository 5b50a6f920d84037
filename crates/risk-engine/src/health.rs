//! Surface freshness and store health

use crate::params::ModelParameters;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spatial_store::{ParameterSource, RiskSurface, SystemState, SystemStateRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

const REPORTED_JOBS: [&str; 2] = ["lifecycle", "materialization"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DbStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceFreshness {
    pub stale: bool,
    pub freshness_seconds: i64,
    pub max_allowed_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub db: DbStatus,
    pub risk_surface: SurfaceFreshness,
    pub jobs: BTreeMap<String, SystemState>,
}

pub struct HealthReporter {
    params: Arc<dyn ParameterSource>,
    surface: Arc<dyn RiskSurface>,
    states: Arc<dyn SystemStateRegistry>,
}

impl HealthReporter {
    pub fn new(
        params: Arc<dyn ParameterSource>,
        surface: Arc<dyn RiskSurface>,
        states: Arc<dyn SystemStateRegistry>,
    ) -> Self {
        Self {
            params,
            surface,
            states,
        }
    }

    pub async fn check(&self) -> HealthReport {
        self.check_at(Utc::now()).await
    }

    /// Degraded when the store does not answer or the surface is older than
    /// the staleness budget. Freshness equal to the budget is still ok.
    pub async fn check_at(&self, now: DateTime<Utc>) -> HealthReport {
        let mut db_up = match self.surface.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("store ping failed: {}", e);
                false
            }
        };

        let params = match ModelParameters::load(self.params.as_ref()).await {
            Ok(params) => params,
            Err(e) => {
                warn!("could not load model parameters, using defaults: {}", e);
                ModelParameters::default()
            }
        };

        let age_ms = match self.surface.latest_surface_update().await {
            Ok(Some(updated_at)) => (now - updated_at).num_milliseconds().max(0),
            Ok(None) => 0,
            Err(e) => {
                warn!("could not read surface freshness: {}", e);
                db_up = false;
                0
            }
        };

        // Compare before truncating: 300.9 s is over a 300 s budget.
        let stale = age_ms > params.materialization_stale_seconds.saturating_mul(1000);
        let freshness_seconds = age_ms / 1000;

        let mut jobs = BTreeMap::new();
        for job in REPORTED_JOBS {
            match self.states.system_state(job).await {
                Ok(Some(state)) => {
                    jobs.insert(job.to_string(), state);
                }
                Ok(None) => {}
                Err(e) => warn!(job, "could not read system state: {}", e),
            }
        }

        HealthReport {
            status: if stale || !db_up {
                HealthStatus::Degraded
            } else {
                HealthStatus::Ok
            },
            db: if db_up { DbStatus::Up } else { DbStatus::Down },
            risk_surface: SurfaceFreshness {
                stale,
                freshness_seconds,
                max_allowed_seconds: params.materialization_stale_seconds,
            },
            jobs,
        }
    }
}
