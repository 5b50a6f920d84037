//! Lifecycle and risk-surface materialization

use crate::ScheduledJob;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spatial_store::{Maintenance, StoreError};
use std::sync::Arc;
use std::time::Duration;

pub const LIFECYCLE_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const MATERIALIZATION_INTERVAL: Duration = Duration::from_secs(60);

/// Expires, decays and archives events.
pub struct LifecycleJob {
    maintenance: Arc<dyn Maintenance>,
    interval: Duration,
}

impl LifecycleJob {
    pub fn new(maintenance: Arc<dyn Maintenance>) -> Self {
        Self::with_interval(maintenance, LIFECYCLE_INTERVAL)
    }

    pub fn with_interval(maintenance: Arc<dyn Maintenance>, interval: Duration) -> Self {
        Self { maintenance, interval }
    }
}

#[async_trait]
impl ScheduledJob for LifecycleJob {
    fn name(&self) -> &'static str {
        "lifecycle"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<String, StoreError> {
        let report = self.maintenance.run_lifecycle_maintenance(now).await?;
        Ok(format!(
            "expired={} decayed={} archived={}",
            report.expired, report.decayed, report.archived
        ))
    }
}

/// Rebuilds risk cells from active events.
pub struct MaterializationJob {
    maintenance: Arc<dyn Maintenance>,
    interval: Duration,
}

impl MaterializationJob {
    pub fn new(maintenance: Arc<dyn Maintenance>) -> Self {
        Self::with_interval(maintenance, MATERIALIZATION_INTERVAL)
    }

    pub fn with_interval(maintenance: Arc<dyn Maintenance>, interval: Duration) -> Self {
        Self { maintenance, interval }
    }
}

#[async_trait]
impl ScheduledJob for MaterializationJob {
    fn name(&self) -> &'static str {
        "materialization"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<String, StoreError> {
        let report = self.maintenance.refresh_risk_surface(now).await?;
        Ok(format!("cells={} events={}", report.cells, report.events))
    }
}
