//! Stub narrative model for tests and offline runs.
//!
//! Returns a canned, schema-conformant outcome without touching the
//! network. The streaming variant chops the same document into small
//! chunks so token plumbing can be exercised end to end.

use async_trait::async_trait;

use crate::types::LlmError;

use super::{GenerationRequest, NarrativeModel, TokenSink};

const STUB_CHUNK_CHARS: usize = 16;

pub struct StubNarrativeModel {
    /// Override for the canned document; `None` uses the default outcome.
    canned: Option<String>,
}

impl StubNarrativeModel {
    pub fn new() -> Self {
        Self { canned: None }
    }

    /// Use a fixed raw response instead of the default canned outcome.
    pub fn with_response(raw: impl Into<String>) -> Self {
        Self {
            canned: Some(raw.into()),
        }
    }

    fn document(&self) -> String {
        match &self.canned {
            Some(raw) => raw.clone(),
            None => serde_json::json!({
                "narrative": "The chronicler considers your deed, and the road unwinds a little further before you.",
                "intents": {
                    "quest": { "action": "none" },
                    "combat": { "action": "none" },
                    "poi": { "action": "none" },
                    "meta": { "pacing": "normal" }
                }
            })
            .to_string(),
        }
    }
}

impl Default for StubNarrativeModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NarrativeModel for StubNarrativeModel {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, LlmError> {
        Ok(self.document())
    }

    async fn generate_stream(
        &self,
        _request: &GenerationRequest,
        sink: TokenSink,
    ) -> Result<String, LlmError> {
        let document = self.document();
        let chunks: Vec<String> = document
            .chars()
            .collect::<Vec<_>>()
            .chunks(STUB_CHUNK_CHARS)
            .map(|c| c.iter().collect())
            .collect();
        for chunk in chunks {
            if sink.send(chunk).await.is_err() {
                break;
            }
        }
        Ok(document)
    }
}
