//! Disruption Gateway
//!
//! HTTP front door for the disruption engine: ingestion, viewport queries,
//! route risk and health, plus the background lifecycle and materialization
//! jobs. Everything runs against one shared store.

use anyhow::Result;
use event_parser::{ChatCompletionExtractor, EventExtractor, SocialEventParser};
use ingestion::{IngestionConfig, IngestionQueue, IngestionService};
use risk_engine::{EventQueryService, HealthReporter, RiskQueryService};
use scheduled_jobs::{spawn_interval, JobRunner, LifecycleJob, MaterializationJob};
use spatial_store::MemoryStore;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod ingest_routes;
mod routes;

use config::GatewayConfig;

#[derive(Clone)]
pub struct AppState {
    pub ingestion: Arc<IngestionService>,
    pub queue: Arc<IngestionQueue>,
    pub risk: Arc<RiskQueryService>,
    pub events: Arc<EventQueryService>,
    pub health: Arc<HealthReporter>,
}

impl AppState {
    /// Wire every service to `store`. Spawns the ingestion queue worker, so
    /// this must run inside a tokio runtime.
    pub fn new(store: Arc<MemoryStore>, parser: SocialEventParser, ingestion: IngestionConfig) -> Self {
        let ingestion = Arc::new(IngestionService::new(store.clone(), store.clone(), parser, ingestion));
        let queue = Arc::new(IngestionQueue::spawn(ingestion.clone()));

        Self {
            ingestion,
            queue,
            risk: Arc::new(RiskQueryService::new(store.clone(), store.clone())),
            events: Arc::new(EventQueryService::new(store.clone())),
            health: Arc::new(HealthReporter::new(store.clone(), store.clone(), store)),
        }
    }
}

fn build_parser(config: &GatewayConfig) -> SocialEventParser {
    let Some(chat) = config.chat.clone() else {
        tracing::info!("   No extractor configured, using keyword heuristics");
        return SocialEventParser::heuristic();
    };

    match ChatCompletionExtractor::new(chat) {
        Ok(extractor) => {
            tracing::info!("   Extractor model: {}", extractor.model());
            let extractor: Arc<dyn EventExtractor> = Arc::new(extractor);
            SocialEventParser::new(Some(extractor))
        }
        Err(e) => {
            tracing::warn!("   Extractor unavailable ({}), using keyword heuristics", e);
            SocialEventParser::heuristic()
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "disruption_gateway=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env()?;

    let store = Arc::new(MemoryStore::new());
    for (key, value) in &config.parameter_seeds {
        store.set_parameter(key.clone(), *value).await;
        tracing::info!("   Parameter {} = {}", key, value);
    }

    let state = AppState::new(store.clone(), build_parser(&config), config.ingestion());
    let queue = state.queue.clone();

    let runner = Arc::new(JobRunner::new(store.clone(), store.clone()));
    let jobs = vec![
        spawn_interval(
            runner.clone(),
            Arc::new(LifecycleJob::with_interval(store.clone(), config.lifecycle_interval)),
        ),
        spawn_interval(
            runner,
            Arc::new(MaterializationJob::with_interval(store.clone(), config.materialization_interval)),
        ),
    ];

    let app = routes::app(state);
    let addr = format!("0.0.0.0:{}", config.port);

    tracing::info!("Disruption Gateway starting on {}", addr);
    tracing::info!("   Default city: {}", config.default_city);
    tracing::info!(
        "   Ingest batching: {} events / {} ms",
        config.ingest_batch_size,
        config.ingest_flush_window.as_millis()
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for job in jobs {
        job.abort();
    }

    // The router (and every state clone) is gone once serve returns.
    match Arc::try_unwrap(queue) {
        Ok(queue) => queue.close().await,
        Err(_) => tracing::warn!("ingestion queue still shared at shutdown; buffered events dropped"),
    }

    tracing::info!("Disruption Gateway stopped");
    Ok(())
}
