//! LLM completion client.
//!
//! POSTs `{prompt, model, max_new_tokens, temperature, top_p, stop_seq,
//! client, stream: false}` with a bearer token and reads the reply from the
//! first shape that matches:
//!
//! 1. `completions[0]` (a string, or an object with `text`, `content`,
//!    `message`, `response` or `completion`)
//! 2. `choices[0].message.content`
//! 3. `choices[0].text`
//! 4. `text`
//! 5. `response`
//!
//! One attempt per request. The read timeout is chosen per request by the
//! caller; the connect timeout is fixed at client construction.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::RemoteFailure;
use crate::traits::{CompletionBackend, CompletionRequest};

const ERROR_BODY_CHARS: usize = 200;

const COMPLETION_KEYS: &[&str] = &["text", "content", "message", "response", "completion"];

/// Completion backend for the HTTP LLM service.
pub struct HttpCompletionBackend {
    client: reqwest::Client,
    url: String,
    token: String,
    config: LlmConfig,
}

impl HttpCompletionBackend {
    pub fn new(config: &LlmConfig, token: String) -> Result<Self> {
        let Some(url) = config.url.clone() else {
            bail!("llm.url is not configured");
        };
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()?;
        Ok(Self {
            client,
            url,
            token,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, RemoteFailure> {
        let body = completion_payload(&self.config, request);
        tracing::debug!(
            url = %self.url,
            prompt_chars = request.prompt.len(),
            timeout_secs = request.read_timeout.as_secs(),
            "llm request"
        );
        let response = self
            .client
            .post(&self.url)
            .timeout(request.read_timeout)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(ERROR_BODY_CHARS)
                .collect();
            return Err(RemoteFailure::Status {
                code: status.as_u16(),
                body,
            });
        }
        let json: Value = response.json().await.map_err(|e| RemoteFailure::Decode {
            message: e.to_string(),
        })?;
        parse_completion(&json)
    }
}

pub fn completion_payload(config: &LlmConfig, request: &CompletionRequest) -> Value {
    json!({
        "prompt": request.prompt,
        "model": config.model,
        "max_new_tokens": request.max_new_tokens,
        "temperature": config.temperature,
        "top_p": config.top_p,
        "stop_seq": config.stop_seq,
        "client": config.client,
        "stream": false,
    })
}

/// Reply text from any accepted response shape.
///
/// # Errors
///
/// [`RemoteFailure::EmptyCompletion`] when a known shape holds only
/// whitespace, [`RemoteFailure::Decode`] when no shape matches.
pub fn parse_completion(json: &Value) -> Result<String, RemoteFailure> {
    let text = first_completion(json)
        .or_else(|| json.pointer("/choices/0/message/content").and_then(Value::as_str).map(str::to_string))
        .or_else(|| json.pointer("/choices/0/text").and_then(Value::as_str).map(str::to_string))
        .or_else(|| json.get("text").and_then(Value::as_str).map(str::to_string))
        .or_else(|| json.get("response").and_then(Value::as_str).map(str::to_string));

    match text {
        Some(t) if t.trim().is_empty() => Err(RemoteFailure::EmptyCompletion),
        Some(t) => Ok(t.trim().to_string()),
        None => {
            let keys: Vec<String> = json
                .as_object()
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default();
            Err(RemoteFailure::Decode {
                message: format!("no completion field in response (keys: {})", keys.join(", ")),
            })
        }
    }
}

fn first_completion(json: &Value) -> Option<String> {
    let first = json.get("completions")?.as_array()?.first()?;
    if let Some(s) = first.as_str() {
        return Some(s.to_string());
    }
    let obj = first.as_object()?;
    COMPLETION_KEYS.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) => Some(s.clone()),
        Value::Object(inner) => inner.get("content").and_then(Value::as_str).map(str::to_string),
        _ => None,
    })
}
