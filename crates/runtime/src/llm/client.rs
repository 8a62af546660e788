//! HTTP narrative model client.
//!
//! Speaks two wire protocols behind one type: OpenAI-compatible chat
//! completions (with strict JSON-schema output via `response_format`) and
//! the Anthropic Messages API (which carries the schema contract in the
//! system instructions instead). Streaming uses the same endpoints with
//! `stream: true` and SSE parsing.

use async_trait::async_trait;

use crate::config::{LlmConfig, LlmProvider};
use crate::observability::redact::body_preview;
use crate::outcome::schema::{outcome_json_schema, OUTCOME_SCHEMA_NAME};
use crate::types::LlmError;

use super::streaming::drain_sse_stream;
use super::{GenerationRequest, NarrativeModel, TokenSink};

const BODY_PREVIEW_BYTES: usize = 256;
const MAX_OUTPUT_TOKENS: u32 = 2048;
const TEMPERATURE: f64 = 0.8;
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct HttpNarrativeModel {
    http: reqwest::Client,
    provider: LlmProvider,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpNarrativeModel {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            provider: config.provider,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        match self.provider {
            LlmProvider::OpenAi => format!("{}/chat/completions", self.base_url),
            LlmProvider::Anthropic => format!("{}/messages", self.base_url),
        }
    }

    fn build_openai_body(&self, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user }
            ],
            "max_tokens": MAX_OUTPUT_TOKENS,
            "temperature": TEMPERATURE,
            "stream": stream,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": OUTCOME_SCHEMA_NAME,
                    "schema": outcome_json_schema(),
                }
            }
        })
    }

    /// Anthropic has no `response_format`; the schema contract rides in the
    /// system instructions and validation catches drift.
    fn build_anthropic_body(&self, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_OUTPUT_TOKENS,
            "temperature": TEMPERATURE,
            "stream": stream,
            "system": request.system,
            "messages": [
                { "role": "user", "content": request.user }
            ]
        })
    }

    fn request_body(&self, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        match self.provider {
            LlmProvider::OpenAi => self.build_openai_body(request, stream),
            LlmProvider::Anthropic => self.build_anthropic_body(request, stream),
        }
    }

    async fn send(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let mut builder = self
            .http
            .post(self.endpoint())
            .header("content-type", "application/json")
            .header(crate::journey::TRACE_HEADER, request.trace_id.as_str());
        builder = match self.provider {
            LlmProvider::OpenAi => {
                builder.header("authorization", format!("Bearer {}", self.api_key))
            }
            LlmProvider::Anthropic => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
        };

        let response = builder
            .json(&self.request_body(request, stream))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(1_000);
        let body = response.text().await.unwrap_or_default();
        let preview = body_preview(&body, BODY_PREVIEW_BYTES);

        Err(match status.as_u16() {
            401 | 403 => LlmError::Auth(preview),
            429 => LlmError::RateLimited { retry_after_ms },
            400 if body.contains("response_format") => LlmError::SchemaUnsupported(preview),
            400..=499 => LlmError::BadRequest(preview),
            status => LlmError::Remote {
                status,
                body_prefix: preview,
            },
        })
    }

    fn extract_content(&self, payload: &serde_json::Value) -> Option<String> {
        match self.provider {
            LlmProvider::OpenAi => payload
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
                .map(|s| s.to_string()),
            // Anthropic returns an array of content blocks; concatenate the
            // text blocks.
            LlmProvider::Anthropic => {
                let blocks = payload.get("content")?.as_array()?;
                let mut text = String::new();
                for block in blocks {
                    if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                        if let Some(part) = block.get("text").and_then(|t| t.as_str()) {
                            text.push_str(part);
                        }
                    }
                }
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            }
        }
    }

    fn log_usage(&self, payload: &serde_json::Value, latency_ms: u64) {
        let Some(usage) = payload.get("usage") else {
            return;
        };
        let read = |keys: [&str; 2]| {
            keys.iter()
                .find_map(|k| usage.get(k).and_then(|v| v.as_u64()))
                .unwrap_or(0)
        };
        tracing::debug!(
            provider = %self.provider,
            model = %self.model,
            prompt_tokens = read(["prompt_tokens", "input_tokens"]),
            completion_tokens = read(["completion_tokens", "output_tokens"]),
            latency_ms,
            "narrative model completion"
        );
    }
}

#[async_trait]
impl NarrativeModel for HttpNarrativeModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let started = std::time::Instant::now();
        let response = self.send(request, false).await?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("malformed provider response: {e}")))?;
        self.log_usage(&payload, started.elapsed().as_millis() as u64);

        self.extract_content(&payload)
            .ok_or_else(|| LlmError::Transport("no content in provider response".to_string()))
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        sink: TokenSink,
    ) -> Result<String, LlmError> {
        let response = self.send(request, true).await?;
        drain_sse_stream(Box::pin(response.bytes_stream()), sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TraceId;

    fn model_for(provider: LlmProvider) -> HttpNarrativeModel {
        HttpNarrativeModel::new(&LlmConfig {
            provider,
            base_url: "https://api.example.test/v1/".to_string(),
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "You are the narrator.".to_string(),
            user: "I open the door.".to_string(),
            trace_id: TraceId::new(),
        }
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        assert_eq!(
            model_for(LlmProvider::OpenAi).base_url,
            "https://api.example.test/v1"
        );
    }

    #[test]
    fn test_endpoints_per_provider() {
        assert_eq!(
            model_for(LlmProvider::OpenAi).endpoint(),
            "https://api.example.test/v1/chat/completions"
        );
        assert_eq!(
            model_for(LlmProvider::Anthropic).endpoint(),
            "https://api.example.test/v1/messages"
        );
    }

    #[test]
    fn test_openai_body_shape() {
        let body = model_for(LlmProvider::OpenAi).request_body(&request(), false);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "I open the door.");
        assert_eq!(body["stream"], false);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(
            body["response_format"]["json_schema"]["name"],
            OUTCOME_SCHEMA_NAME
        );
        assert!(body["response_format"]["json_schema"]["schema"]["properties"]["narrative"]
            .is_object());
    }

    #[test]
    fn test_anthropic_body_shape() {
        let body = model_for(LlmProvider::Anthropic).request_body(&request(), true);
        assert_eq!(body["system"], "You are the narrator.");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["stream"], true);
        // No response_format on this protocol.
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_streaming_body_sets_stream_flag() {
        let body = model_for(LlmProvider::OpenAi).request_body(&request(), true);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_extract_content_openai() {
        let payload = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"narrative\": \"x\"}" } }]
        });
        assert_eq!(
            model_for(LlmProvider::OpenAi).extract_content(&payload),
            Some("{\"narrative\": \"x\"}".to_string())
        );
        assert_eq!(
            model_for(LlmProvider::OpenAi).extract_content(&serde_json::json!({})),
            None
        );
    }

    #[test]
    fn test_extract_content_anthropic_concatenates_text_blocks() {
        let payload = serde_json::json!({
            "content": [
                { "type": "text", "text": "{\"narrative\": " },
                { "type": "tool_use", "id": "t1", "name": "n", "input": {} },
                { "type": "text", "text": "\"x\"}" }
            ]
        });
        assert_eq!(
            model_for(LlmProvider::Anthropic).extract_content(&payload),
            Some("{\"narrative\": \"x\"}".to_string())
        );
    }
}
