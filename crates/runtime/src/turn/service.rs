//! The service facade: the surface a transport layer programs against.
//!
//! Owns the orchestrator and its shared collaborators, and exposes turn
//! processing (plain and streaming), audit reads, policy reload and
//! metrics. Streaming turns run on a detached task so a client disconnect
//! never interrupts the write phases.

use std::sync::Arc;

use thiserror::Error;

use crate::audit::{TurnAuditStore, TurnRecord};
use crate::config::{Config, ConfigError, PolicyConfig, PolicyConfigManager};
use crate::journey::{JourneyLog, JourneyLogHttpClient};
use crate::llm::{HttpNarrativeModel, NarrativeModel, StubNarrativeModel, TokenSink};
use crate::observability::{MetricsSnapshot, RuntimeMetrics};
use crate::types::{CharacterId, JourneyLogError, LlmError, TurnId};

use super::orchestrator::{TurnOrchestrator, TurnRequest};
use super::summary::{TurnFailure, TurnResult};

/// Errors constructing a [`TurnService`].
#[derive(Debug, Error)]
pub enum ServiceBuildError {
    #[error("configuration invalid: {0}")]
    Config(#[from] ConfigError),

    #[error("journey-log client: {0}")]
    Journey(#[from] JourneyLogError),

    #[error("narrative model client: {0}")]
    Model(#[from] LlmError),
}

/// The turn-processing service.
pub struct TurnService {
    orchestrator: Arc<TurnOrchestrator>,
    policy: Arc<PolicyConfigManager>,
    audit: Arc<TurnAuditStore>,
    metrics: Arc<RuntimeMetrics>,
}

impl TurnService {
    /// Build from configuration: HTTP journey-log client and either the
    /// HTTP narrative model or the stub, per `llm.stub_mode`.
    pub fn from_config(config: Config) -> Result<Self, ServiceBuildError> {
        config.validate()?;
        let journey: Arc<dyn JourneyLog> = Arc::new(JourneyLogHttpClient::new(&config.journey_log)?);
        let model: Arc<dyn NarrativeModel> = if config.llm.stub_mode {
            Arc::new(StubNarrativeModel::new())
        } else {
            Arc::new(HttpNarrativeModel::new(&config.llm)?)
        };
        Ok(Self::with_components(&config, journey, model))
    }

    /// Build with injected collaborators. Used by tests and embedders that
    /// bring their own store or model.
    pub fn with_components(
        config: &Config,
        journey: Arc<dyn JourneyLog>,
        model: Arc<dyn NarrativeModel>,
    ) -> Self {
        let policy = Arc::new(PolicyConfigManager::new(config.policy.clone()));
        let audit = Arc::new(TurnAuditStore::new(&config.audit));
        let metrics = Arc::new(RuntimeMetrics::new());
        let orchestrator = Arc::new(TurnOrchestrator::new(
            config,
            journey,
            model,
            Arc::clone(&policy),
            Arc::clone(&audit),
            Arc::clone(&metrics),
        ));
        Self {
            orchestrator,
            policy,
            audit,
            metrics,
        }
    }

    /// Process one turn and return when it has fully completed.
    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnResult, TurnFailure> {
        self.orchestrator.process(request).await
    }

    /// Process one turn, streaming model tokens into `sink`.
    ///
    /// The turn runs on its own task: dropping this future (client gone)
    /// stops token delivery but the writes and the audit record still
    /// complete.
    pub async fn process_turn_stream(
        &self,
        request: TurnRequest,
        sink: TokenSink,
    ) -> Result<TurnResult, TurnFailure> {
        let trace_id = request.trace_id.clone().unwrap_or_default();
        let orchestrator = Arc::clone(&self.orchestrator);
        let request = request.with_trace(trace_id.clone());
        let handle =
            tokio::spawn(async move { orchestrator.process_streaming(request, sink).await });
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(TurnFailure::internal(
                trace_id,
                format!("turn task failed: {e}"),
            )),
        }
    }

    /// Audit read: one turn by id.
    pub fn turn(&self, turn_id: &TurnId) -> Option<Arc<TurnRecord>> {
        self.audit.get(turn_id)
    }

    /// Audit read: most recent turns for a character, newest first.
    pub fn recent_turns(&self, character_id: &CharacterId, limit: usize) -> Vec<Arc<TurnRecord>> {
        self.audit.recent_for_character(character_id, limit)
    }

    /// Admin: validate and atomically install a new policy configuration.
    pub fn apply_policy_config(&self, new_config: PolicyConfig) -> Result<(), ConfigError> {
        self.policy.apply(new_config)
    }

    /// Admin: restore the previously active policy configuration.
    pub fn rollback_policy_config(&self) -> bool {
        self.policy.rollback()
    }

    /// The active policy snapshot.
    pub fn policy_config(&self) -> Arc<PolicyConfig> {
        self.policy.snapshot()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
