//! Narrative model clients.
//!
//! The [`NarrativeModel`] trait is the single logical contract: given system
//! instructions and a user prompt, produce one JSON document expected to
//! match the outcome schema. Two production modes (single-shot and
//! token-streaming) share it, and a stub implementation serves tests and
//! offline runs.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{LlmError, TraceId};

pub mod client;
pub mod streaming;
pub mod stub;

pub use client::HttpNarrativeModel;
pub use stub::StubNarrativeModel;

/// One generation request. Carries the per-turn trace id so the provider
/// call can be correlated with the rest of the turn.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub trace_id: TraceId,
}

/// Receiving end of the token stream. Send failures mean the client went
/// away; producers stop forwarding but keep buffering.
pub type TokenSink = mpsc::Sender<String>;

/// A model that turns a prompt into raw outcome text.
#[async_trait]
pub trait NarrativeModel: Send + Sync {
    /// Single-shot generation. Returns the raw text to be validated.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;

    /// Streaming generation. Every emitted token is forwarded to `sink` and
    /// appended to an internal buffer; the buffered text is returned after
    /// the stream terminates. The returned text always equals the
    /// concatenation of the streamed tokens.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        sink: TokenSink,
    ) -> Result<String, LlmError>;
}
