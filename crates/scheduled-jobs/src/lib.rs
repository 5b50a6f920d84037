//! Scheduled Jobs
//!
//! Periodic store maintenance guarded by named try-locks, so that only one
//! process runs a given job at a time. Every run follows the same protocol:
//!
//! 1. try-lock the job name; not acquired → skip, nothing touched
//! 2. run the job body
//! 3. record a [`SystemState`] (OK + duration, or FAILED + error)
//! 4. unlock, on every exit path including a panic in the body

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use spatial_store::{AdvisoryLocks, StoreError, SystemState, SystemStateRegistry};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub mod jobs;

pub use jobs::{LifecycleJob, MaterializationJob};

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Lock name and system state key.
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// Job body. The returned string is a short summary for the log line.
    async fn run(&self, now: DateTime<Utc>) -> Result<String, StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Lock held elsewhere
    Skipped,
    Succeeded { duration_ms: f64 },
    Failed { error: String },
}

pub struct JobRunner {
    locks: Arc<dyn AdvisoryLocks>,
    states: Arc<dyn SystemStateRegistry>,
}

impl JobRunner {
    pub fn new(locks: Arc<dyn AdvisoryLocks>, states: Arc<dyn SystemStateRegistry>) -> Self {
        Self { locks, states }
    }

    pub async fn run_once(&self, job: &dyn ScheduledJob) -> JobOutcome {
        self.run_once_at(job, Utc::now()).await
    }

    pub async fn run_once_at(&self, job: &dyn ScheduledJob, now: DateTime<Utc>) -> JobOutcome {
        let name = job.name();
        let tag = name.to_uppercase();

        match self.locks.try_lock(name).await {
            Ok(true) => {}
            Ok(false) => {
                info!(job = name, skipped = true, reason = "lock-held", "[{}]", tag);
                return JobOutcome::Skipped;
            }
            Err(e) => {
                error!(job = name, status = "FAILED", error = %e, "[{}] could not take lock", tag);
                return JobOutcome::Failed { error: e.to_string() };
            }
        }

        let started = Instant::now();
        let result = AssertUnwindSafe(job.run(now)).catch_unwind().await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (outcome, state) = match result {
            Ok(Ok(summary)) => {
                info!(job = name, status = "SUCCESS", duration_ms, "[{}] {}", tag, summary);
                (JobOutcome::Succeeded { duration_ms }, SystemState::ok(duration_ms, now))
            }
            Ok(Err(e)) => {
                error!(job = name, status = "FAILED", error = %e, "[{}]", tag);
                let error = e.to_string();
                (JobOutcome::Failed { error: error.clone() }, SystemState::failed(error, now))
            }
            Err(_) => {
                error!(job = name, status = "FAILED", "[{}] job panicked", tag);
                let error = "job panicked".to_string();
                (JobOutcome::Failed { error: error.clone() }, SystemState::failed(error, now))
            }
        };

        if let Err(e) = self.states.set_system_state(name, state).await {
            warn!(job = name, "could not record system state: {}", e);
        }

        if let Err(e) = self.locks.unlock(name).await {
            warn!(job = name, "could not release lock: {}", e);
        }

        outcome
    }
}

/// Run `job` on its interval until the task is aborted. The first tick fires
/// immediately; ticks missed while a run is in flight are skipped.
pub fn spawn_interval(runner: Arc<JobRunner>, job: Arc<dyn ScheduledJob>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(job.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(job = job.name(), interval_secs = job.interval().as_secs(), "scheduled job started");

        loop {
            ticker.tick().await;
            runner.run_once(job.as_ref()).await;
        }
    })
}
