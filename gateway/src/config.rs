//! Gateway configuration from environment variables

use anyhow::{Context, Result};
use event_parser::ChatCompletionConfig;
use ingestion::IngestionConfig;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;

/// Store-resident model parameters that may be seeded at startup.
const PARAMETER_KEYS: [&str; 4] = [
    "SIGMOID_K",
    "MAX_ROUTE_VERTICES",
    "MAX_ROUTE_DISTANCE_KM",
    "MATERIALIZATION_STALE_SECONDS",
];

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub default_city: String,
    pub ingest_source: String,
    pub lifecycle_interval: Duration,
    pub materialization_interval: Duration,
    pub ingest_batch_size: usize,
    pub ingest_flush_window: Duration,
    /// Initial model parameter rows, written into the store before serving
    pub parameter_seeds: Vec<(String, f64)>,
    /// Only present when an API key is configured
    pub chat: Option<ChatCompletionConfig>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("DISRUPTION_GATEWAY_PORT").or_else(|| get("PORT")) {
            Some(raw) => raw.parse().with_context(|| format!("invalid port {:?}", raw))?,
            None => DEFAULT_PORT,
        };

        let mut parameter_seeds = Vec::new();
        for key in PARAMETER_KEYS {
            if let Some(value) = parse_opt::<f64>(&get, key)? {
                parameter_seeds.push((key.to_string(), value));
            }
        }

        let chat = get("OPENAI_API_KEY").map(|api_key| {
            let mut chat = ChatCompletionConfig::new(api_key);
            if let Some(model) = get("OPENAI_MODEL") {
                chat.model = model;
            }
            if let Some(base_url) = get("OPENAI_BASE_URL") {
                chat.base_url = base_url.trim_end_matches('/').to_string();
            }
            chat
        });

        Ok(Self {
            port,
            default_city: get("DEFAULT_CITY").unwrap_or_else(|| "DEL".to_string()).to_uppercase(),
            ingest_source: get("INGEST_SOURCE").unwrap_or_else(|| "TWITTER".to_string()),
            lifecycle_interval: Duration::from_secs(
                parse_opt(&get, "LIFECYCLE_INTERVAL_SECS")?.unwrap_or(15 * 60),
            ),
            materialization_interval: Duration::from_secs(
                parse_opt(&get, "MATERIALIZATION_INTERVAL_SECS")?.unwrap_or(60),
            ),
            ingest_batch_size: parse_opt(&get, "INGEST_BATCH_SIZE")?.unwrap_or(100),
            ingest_flush_window: Duration::from_millis(
                parse_opt(&get, "INGEST_FLUSH_WINDOW_MS")?.unwrap_or(1000),
            ),
            parameter_seeds,
            chat,
        })
    }

    pub fn ingestion(&self) -> IngestionConfig {
        IngestionConfig {
            source: self.ingest_source.clone(),
            default_city: self.default_city.clone(),
            batch_size: self.ingest_batch_size,
            flush_window: self.ingest_flush_window,
        }
    }
}

fn parse_opt<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|raw| raw.parse::<T>().with_context(|| format!("invalid {}: {:?}", key, raw)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<GatewayConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        GatewayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.default_city, "DEL");
        assert_eq!(config.lifecycle_interval, Duration::from_secs(900));
        assert_eq!(config.materialization_interval, Duration::from_secs(60));
        assert_eq!(config.ingest_batch_size, 100);
        assert_eq!(config.ingest_flush_window, Duration::from_secs(1));
        assert!(config.parameter_seeds.is_empty());
        assert!(config.chat.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PORT", "8080"),
            ("DISRUPTION_GATEWAY_PORT", "9090"),
            ("DEFAULT_CITY", "blr"),
            ("SIGMOID_K", "25"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4o"),
        ])
        .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.default_city, "BLR");
        assert_eq!(config.parameter_seeds, vec![("SIGMOID_K".to_string(), 25.0)]);
        let chat = config.chat.unwrap();
        assert_eq!(chat.model, "gpt-4o");
        assert_eq!(chat.api_key, "sk-test");
    }

    #[test]
    fn test_invalid_numbers_fail() {
        assert!(config(&[("PORT", "http")]).is_err());
        assert!(config(&[("INGEST_BATCH_SIZE", "-1")]).is_err());
        assert!(config(&[("MAX_ROUTE_VERTICES", "many")]).is_err());
    }
}
