use crate::digest::Summarizer;
use crate::error::KeeperError;
use crate::preferences::Preferences;
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const API_KEY_VAR: &str = "CLAUDE_SUMMARY_API_KEY";
pub const FALLBACK_API_KEY_VAR: &str = "ANTHROPIC_API_KEY";
pub const API_URL_VAR: &str = "CLAUDE_SUMMARY_API_URL";
pub const MODEL_VAR: &str = "CLAUDE_SUMMARY_MODEL";

const DEFAULT_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4000;

/// Where and how to reach the remote summarizer.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl RemoteConfig {
    /// Resolve the configuration through `lookup` (normally the process
    /// environment). Returns `None` when no API key is set, which means the
    /// remote summarizer is unavailable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, prefs: &Preferences) -> Option<Self> {
        let non_empty = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let api_key = non_empty(API_KEY_VAR).or_else(|| non_empty(FALLBACK_API_KEY_VAR))?;
        Some(Self {
            api_key,
            base_url: non_empty(API_URL_VAR).unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            model: non_empty(MODEL_VAR).unwrap_or_else(|| prefs.remote_model.clone()),
            timeout: prefs.remote_timeout(),
        })
    }

    pub fn from_env(prefs: &Preferences) -> Option<Self> {
        Self::from_lookup(|var| std::env::var(var).ok(), prefs)
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

/// Summarizer backed by the Anthropic Messages API.
pub struct AnthropicSummarizer {
    config: RemoteConfig,
}

impl AnthropicSummarizer {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }
}

fn remote_err(err: impl std::fmt::Display) -> KeeperError {
    KeeperError::RemoteGenerationFailed(err.to_string())
}

impl Summarizer for AnthropicSummarizer {
    fn summarize(&self, prompt: &str) -> Result<String, KeeperError> {
        let payload = serde_json::json!({
            "model": self.config.model,
            "max_tokens": MAX_TOKENS,
            "messages": [
                { "role": "user", "content": prompt }
            ]
        });

        let client = Client::builder()
            .timeout(self.config.timeout)
            .build()
            .map_err(remote_err)?;
        let url = self.config.messages_url();
        debug!(%url, model = %self.config.model, "requesting remote summary");
        let response = client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .map_err(remote_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(remote_err(format!("summary call failed with status {status}")));
        }
        let json: Value = response.json().map_err(remote_err)?;
        extract_anthropic_text(&json)
            .ok_or_else(|| remote_err("response has no text content"))
    }
}

/// Concatenated text blocks of a Messages API response.
fn extract_anthropic_text(json: &Value) -> Option<String> {
    let content = json.get("content").and_then(Value::as_array)?;
    let chunks: Vec<&str> = content
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    let text = chunks.join("\n");
    if text.trim().is_empty() { None } else { Some(text) }
}
