//! Disruption CLI
//!
//! Command-line access to a running disruption gateway.
//!
//! Usage:
//!   disruption-cli events --min-lat 28.5 --max-lat 28.8 --min-lng 77.0 --max-lng 77.4
//!   disruption-cli risk --city DEL 28.61,77.20 28.63,77.22
//!   disruption-cli report --source-id tw-1 "Accident near ITO 28.61, 77.20"
//!   disruption-cli health

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use disruption_client::{DisruptionClient, ViewportQuery, DEFAULT_BASE_URL};
use event_parser::SocialPost;
use geo_events::{BoundingBox, Coordinate};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "disruption-cli", about = "Query and feed the urban disruption gateway")]
struct Args {
    /// Gateway base URL
    #[arg(long, env = "DISRUPTION_API_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Active events in a viewport
    Events {
        #[arg(long, allow_hyphen_values = true)]
        min_lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        max_lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        min_lng: f64,
        #[arg(long, allow_hyphen_values = true)]
        max_lng: f64,
        #[arg(long)]
        city: Option<String>,
        /// Comma separated, e.g. ACCIDENT,PROTEST
        #[arg(long, value_delimiter = ',')]
        event_types: Vec<String>,
        #[arg(long)]
        min_severity: Option<u8>,
    },
    /// Score a route given as lat,lng points
    Risk {
        #[arg(long)]
        city: String,
        #[arg(required = true, allow_hyphen_values = true)]
        points: Vec<String>,
    },
    /// Submit a free-text disruption report
    Report {
        #[arg(long)]
        source_id: String,
        /// RFC 3339 observation time
        #[arg(long)]
        observed_at: Option<String>,
        text: String,
    },
    /// Gateway health
    Health,
}

fn parse_point(raw: &str) -> Result<Coordinate> {
    let (lat, lng) = raw
        .split_once(',')
        .ok_or_else(|| anyhow!("expected lat,lng but got {:?}", raw))?;
    let lat: f64 = lat.trim().parse().with_context(|| format!("bad latitude in {:?}", raw))?;
    let lng: f64 = lng.trim().parse().with_context(|| format!("bad longitude in {:?}", raw))?;
    Ok(Coordinate::new(lat, lng)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client = DisruptionClient::new(&args.base_url)?;
    info!("Using gateway at {}", client.base_url());

    match args.command {
        Command::Events {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
            city,
            event_types,
            min_severity,
        } => {
            let mut query = ViewportQuery::new(BoundingBox::new(min_lat, max_lat, min_lng, max_lng)?);
            query.city = city;
            query.event_types = event_types;
            query.min_severity = min_severity;

            let events = client.fetch_events(&query).await?;
            info!("{} active events", events.len());
            print_json(&events)?;
        }
        Command::Risk { city, points } => {
            let coordinates = points.iter().map(|p| parse_point(p)).collect::<Result<Vec<_>>>()?;
            let risk = client.route_risk(coordinates, &city).await?;
            print_json(&risk)?;
        }
        Command::Report {
            source_id,
            observed_at,
            text,
        } => {
            let mut post = SocialPost::new(source_id, text);
            post.observed_at = observed_at;
            let result = client.ingest_social(&post).await?;
            print_json(&result)?;
        }
        Command::Health => {
            let report = client.health().await?;
            print_json(&report)?;
        }
    }

    Ok(())
}
