/// Generative Client - Delegated Judgment Transport
///
/// **Core Responsibility:**
/// Send a prompt to a text-generation service and hand back raw text, or JSON
/// recovered from it.
///
/// **Providers:**
/// - Ollama: `POST {base}/api/generate`, non-streaming
/// - OpenAI-compatible: `POST {base}/chat/completions` with bearer auth
///
/// **Failure Semantics:**
/// HTTP 429 is retried up to `LLM_MAX_RETRIES` times after the first attempt,
/// so `LLM_MAX_RETRIES=0` means a single request. Waits honour `retry-after`
/// and otherwise back off `min(2^attempt * 3, 60)` seconds. Everything else
/// surfaces as a `JudgmentError`; callers decide how to degrade.

use assay_common::config::{LlmProvider, LlmSettings};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const MAX_BACKOFF_SECONDS: f64 = 60.0;
const JSON_ONLY_INSTRUCTION: &str = "IMPORTANT: You MUST respond with valid JSON only. No extra text.";

lazy_static! {
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)\n?\s*```").unwrap();
}

#[derive(Debug, Error)]
pub enum JudgmentError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("still rate limited after {0} attempts")]
    RateLimited(u32),
    #[error("response is not valid JSON: {0}")]
    Malformed(String),
    #[error("response is missing '{0}'")]
    MissingField(&'static str),
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for JSON mode
    pub json: bool,
    /// Route to the coding model instead of the general one
    pub coding: bool,
}

impl GenerationRequest {
    pub fn json(system: impl Into<String>, prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            system: system.into(),
            temperature,
            max_tokens: 4096,
            json: true,
            coding: false,
        }
    }

    pub fn for_code(mut self) -> Self {
        self.coding = true;
        self
    }
}

/// Call-and-response access to a text-generation service.
#[async_trait]
pub trait GenerativeClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, JudgmentError>;
}

fn preview(raw: &str) -> String {
    raw.chars().take(200).collect()
}

/// Recover a JSON object from model output.
///
/// Tries, in order: the whole text, the first fenced code block, the widest
/// `{...}` span. Anything that is not an object is rejected.
pub fn parse_json_lenient(raw: &str) -> Option<Value> {
    let object = |text: &str| serde_json::from_str::<Value>(text).ok().filter(Value::is_object);

    if let Some(value) = object(raw.trim()) {
        return Some(value);
    }

    if let Some(value) = FENCED_BLOCK
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .and_then(|m| object(m.as_str()))
    {
        return Some(value);
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    object(&raw[start..=end])
}

/// Generate and parse a JSON object
pub async fn generate_json(
    client: &dyn GenerativeClient,
    request: &GenerationRequest,
) -> Result<Value, JudgmentError> {
    let raw = client.generate(request).await?;
    parse_json_lenient(&raw).ok_or_else(|| JudgmentError::Malformed(preview(&raw)))
}

/// Wait before retry number `attempt` (0-based) after a 429.
pub fn retry_delay(retry_after: Option<&str>, attempt: u32) -> Duration {
    let seconds = retry_after
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s >= 0.0)
        .unwrap_or_else(|| 2f64.powi(attempt as i32) * 3.0)
        .min(MAX_BACKOFF_SECONDS);
    Duration::from_secs_f64(seconds)
}

pub struct HttpGenerativeClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl HttpGenerativeClient {
    pub fn new(settings: LlmSettings) -> Result<Self, JudgmentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;
        Ok(Self { http, settings })
    }

    fn model(&self, request: &GenerationRequest) -> &str {
        if request.coding {
            &self.settings.coding_model
        } else {
            &self.settings.model
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    async fn post_with_retry(&self, url: &str, body: &Value) -> Result<Value, JudgmentError> {
        let attempts = self.settings.max_retries.saturating_add(1);

        for attempt in 0..attempts {
            let mut builder = self.http.post(url).json(body);
            if let Some(key) = &self.settings.api_key {
                builder = builder.bearer_auth(key);
            }

            let response = builder.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt + 1 == attempts {
                    break;
                }
                let header = response.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok());
                let wait = retry_delay(header, attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    wait_seconds = wait.as_secs_f64(),
                    "Generative service rate limited, backing off"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(JudgmentError::Status {
                    status: status.as_u16(),
                    body: text.chars().take(300).collect(),
                });
            }

            return Ok(response.json::<Value>().await?);
        }

        Err(JudgmentError::RateLimited(attempts))
    }

    async fn generate_ollama(&self, request: &GenerationRequest) -> Result<String, JudgmentError> {
        let mut body = json!({
            "model": self.model(request),
            "prompt": request.prompt,
            "system": request.system,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });
        if request.json {
            body["format"] = json!("json");
        }

        let response = self.post_with_retry(&self.endpoint("api/generate"), &body).await?;
        response
            .get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(JudgmentError::MissingField("response"))
    }

    async fn generate_openai(&self, request: &GenerationRequest) -> Result<String, JudgmentError> {
        let mut messages = Vec::new();
        if !request.system.is_empty() {
            let mut system = request.system.clone();
            if request.json {
                system.push_str("\n\n");
                system.push_str(JSON_ONLY_INSTRUCTION);
            }
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let mut body = json!({
            "model": self.model(request),
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.json {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = self.post_with_retry(&self.endpoint("chat/completions"), &body).await?;
        response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(JudgmentError::MissingField("choices[0].message.content"))
    }
}

#[async_trait]
impl GenerativeClient for HttpGenerativeClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, JudgmentError> {
        match self.settings.provider {
            LlmProvider::Ollama => self.generate_ollama(request).await,
            LlmProvider::OpenAi => self.generate_openai(request).await,
        }
    }
}
