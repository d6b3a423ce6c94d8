use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{PipelineError, error::truncate_body};

use super::{BackendId, GenerationRequest, TextGenerationBackend, TextOutput};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

/// Single-shot completions through the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicBackend {
    pub fn new(api_key: String, model: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn create_message(
        &self,
        req: &CreateMessageRequest<'_>,
    ) -> Result<CreateMessageResponse, PipelineError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|_| {
                PipelineError::generation_failed("Anthropic API key contains invalid characters")
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(req)
            .send()
            .await
            .map_err(|e| {
                PipelineError::generation_failed(format!("Anthropic request failed: {e}"))
            })?;

        let status = res.status();
        let text = res.text().await.map_err(|e| {
            PipelineError::generation_failed(format!("failed to read Anthropic response body: {e}"))
        })?;
        if !status.is_success() {
            return Err(PipelineError::generation_failed(format!(
                "Anthropic returned {status}: {}",
                error_message(&text)
            )));
        }

        serde_json::from_str::<CreateMessageResponse>(&text).map_err(|e| {
            PipelineError::generation_failed(format!("failed to parse Anthropic response: {e}"))
        })
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            match block {
                ContentBlock::Text { text } => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
                ContentBlock::Unknown => {}
            }
        }
        out
    }
}

#[async_trait]
impl TextGenerationBackend for AnthropicBackend {
    fn id(&self) -> BackendId {
        BackendId::Anthropic
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<TextOutput, PipelineError> {
        let req = CreateMessageRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        debug!(model = %self.model, max_tokens = request.max_tokens, "sending Anthropic message");
        let res = self.create_message(&req).await?;

        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            warn!(
                max_tokens = request.max_tokens,
                "Anthropic stop_reason=max_tokens; recommendation may be cut short"
            );
        }

        let text = Self::response_text(&res);
        if text.trim().is_empty() {
            return Err(PipelineError::generation_failed(
                "Anthropic response contained no text",
            ));
        }

        Ok(TextOutput::Complete(text))
    }
}

/// Anthropic errors look like `{"type": "error", "error": {"type": ..., "message": ...}}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| truncate_body(body))
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Clone, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Unknown,
}
