//! Risk Engine
//!
//! Read side of the disruption pipeline:
//!
//! - [`RiskQueryService`]: scores a route against the materialized risk surface
//! - [`EventQueryService`]: viewport queries over active events
//! - [`HealthReporter`]: surface freshness against the staleness budget
//!
//! All three read [`ModelParameters`] from the store on every call, so
//! operators can retune without a redeploy.

pub mod events;
pub mod health;
pub mod params;
pub mod risk;
pub mod scoring;

pub use events::{EventQuery, EventQueryParams, EventQueryService, EventView, QueryError, MAX_EVENTS};
pub use health::{DbStatus, HealthReport, HealthReporter, HealthStatus, SurfaceFreshness};
pub use params::ModelParameters;
pub use risk::{RiskError, RiskQueryService, RouteRisk, RouteRiskRequest};
pub use scoring::{classify, normalize_score, RiskLevel, MODEL_VERSION};
