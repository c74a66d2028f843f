//! Google Gemini `generateContent` client

use super::{GenerationError, Generator};
use crate::config::LlmConfig;
use crate::error::{RareGenError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub struct GeminiGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiGenerator {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RareGenError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.trim_start_matches("models/").to_string(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

fn request_body(prompt: &str, temperature: f32) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "generationConfig": { "temperature": temperature },
    })
}

fn classify_status(status: StatusCode, body: &str) -> GenerationError {
    let message = format!("HTTP {}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        GenerationError::Transient(message)
    } else {
        GenerationError::Permanent(message)
    }
}

/// Pull the first candidate's text out of a response payload
fn extract_text(payload: &Value) -> std::result::Result<String, GenerationError> {
    if let Some(reason) = payload["promptFeedback"]["blockReason"].as_str() {
        return Err(GenerationError::Permanent(format!(
            "prompt blocked by the model: {}",
            reason
        )));
    }

    let parts = payload["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| GenerationError::Permanent("response has no candidates".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|part| part["text"].as_str())
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(GenerationError::Permanent("model returned empty text".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str, temperature: f32) -> std::result::Result<String, GenerationError> {
        if !(0.0..=1.0).contains(&temperature) {
            return Err(GenerationError::Permanent(format!(
                "temperature {} outside [0, 1]",
                temperature
            )));
        }

        debug!("Calling {} ({} prompt chars)", self.model, prompt.chars().count());

        let res = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(prompt, temperature))
            .send()
            .await
            .map_err(|e| {
                let transient = e.is_timeout() || e.is_connect() || e.is_request();
                let message = e.without_url().to_string();
                if transient {
                    GenerationError::Transient(message)
                } else {
                    GenerationError::Permanent(message)
                }
            })?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| {
                GenerationError::Transient(format!("unreadable response: {}", e.without_url()))
            })?;

        extract_text(&payload)
    }
}
