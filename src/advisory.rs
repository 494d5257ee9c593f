use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Advisory as AdvisoryConfig;

/// Free-text advisory service. Implementations must never fail: every error
/// is folded into the returned text.
#[async_trait]
pub trait Advisor: Send + Sync {
    /// Whether a backing service is available at all.
    fn is_configured(&self) -> bool;

    async fn ask(&self, prompt: &str) -> String;
}

/// Stand-in used when no API key is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

#[async_trait]
impl Advisor for Unconfigured {
    fn is_configured(&self) -> bool {
        false
    }

    async fn ask(&self, _prompt: &str) -> String {
        "[advisory API key not set]".to_string()
    }
}

/// Chat-completions client for the Perplexity API.
#[derive(Clone)]
pub struct PerplexityClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl fmt::Debug for PerplexityClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerplexityClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl PerplexityClient {
    pub fn from_config(cfg: &AdvisoryConfig) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url).context("invalid advisory base URL")?;
        let http = Client::builder()
            .user_agent("clinic-booker/0.1")
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()
            .context("failed to build advisory HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key: cfg.api_key.trim().to_string(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
        })
    }

    pub fn build_request(&self, prompt: &str) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("chat/completions")
            .context("invalid advisory base URL")?;
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.max_tokens,
        });
        self.http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .build()
            .context("failed to build advisory request")
    }

    async fn execute(&self, prompt: &str) -> Result<String, String> {
        let request = self.build_request(prompt).map_err(|e| e.to_string())?;
        debug!(url = %request.url(), model = %self.model, "advisory request");
        let res = self
            .http
            .execute(request)
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if status != StatusCode::OK {
            warn!(%status, "advisory API error");
            return Err(format!("Error {}: {}", status.as_u16(), body));
        }
        Ok(extract_content(&body))
    }
}

#[async_trait]
impl Advisor for PerplexityClient {
    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn ask(&self, prompt: &str) -> String {
        if !self.is_configured() {
            return Unconfigured.ask(prompt).await;
        }
        self.execute(prompt).await.unwrap_or_else(|err| err)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

/// Pull `choices[0].message.content` out of a response body, falling back to
/// the body itself when the shape is unexpected.
pub fn extract_content(body: &str) -> String {
    match serde_json::from_str::<ChatResponse>(body) {
        Ok(parsed) => match parsed.choices.into_iter().next() {
            Some(choice) => choice.message.content,
            None => body.to_string(),
        },
        Err(_) => match serde_json::from_str::<Value>(body) {
            Ok(value) => value.to_string(),
            Err(_) => body.to_string(),
        },
    }
}
