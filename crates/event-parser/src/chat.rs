//! Chat-completion extractor
//!
//! Asks an OpenAI-compatible chat-completions endpoint to pull a structured
//! event out of the post text. Only configured when an API key is present.

use crate::{EventExtractor, ExtractError, ExtractedCandidate, SocialPost};
use async_trait::async_trait;
use geo_events::EventType;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct ChatCompletionConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_sec: u64,
}

impl ChatCompletionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_sec: 10,
        }
    }

    /// `OPENAI_API_KEY` (required), `OPENAI_MODEL`, `OPENAI_BASE_URL`.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())?;

        let mut config = Self::new(api_key);
        if let Some(model) = std::env::var("OPENAI_MODEL").ok().filter(|m| !m.trim().is_empty()) {
            config.model = model.trim().to_string();
        }
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        Some(config)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct ChatCompletionExtractor {
    config: ChatCompletionConfig,
    client: reqwest::Client,
}

impl ChatCompletionExtractor {
    pub fn new(config: ChatCompletionConfig) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_sec))
            .build()
            .map_err(|e| ExtractError::Request(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn system_prompt() -> String {
        let types: Vec<&str> = EventType::ALL.iter().map(|t| t.as_str()).collect();
        format!(
            "Extract a traffic disruption event from social text and return strict JSON with keys: \
             lat, lng, event_type, severity_hint, observed_at. event_type must be one of {}. \
             severity_hint is integer 1..5.",
            types.join(", ")
        )
    }

    fn request_body(&self, post: &SocialPost) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "response_format": { "type": "json_object" },
            "temperature": 0,
            "messages": [
                { "role": "system", "content": Self::system_prompt() },
                {
                    "role": "user",
                    "content": format!(
                        "source_id={}\nobserved_at={}\ntext={}",
                        post.source_id,
                        post.observed_at.as_deref().unwrap_or(""),
                        post.text
                    )
                }
            ]
        })
    }
}

/// Pull the candidate out of a chat-completions response body.
fn candidate_from_body(body: ChatResponse) -> Result<ExtractedCandidate, ExtractError> {
    let content = body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or(ExtractError::EmptyResponse)?;

    serde_json::from_str(&content).map_err(|e| ExtractError::InvalidPayload(e.to_string()))
}

#[async_trait]
impl EventExtractor for ChatCompletionExtractor {
    async fn extract(&self, post: &SocialPost) -> Result<ExtractedCandidate, ExtractError> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(post))
            .send()
            .await
            .map_err(|e| ExtractError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExtractError::Status(response.status().as_u16()));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::InvalidPayload(e.to_string()))?;

        candidate_from_body(body)
    }
}
