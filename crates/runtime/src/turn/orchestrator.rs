//! The turn orchestrator: one request in, one audited turn out.
//!
//! Phases run in strict order — admit, fetch context, policy, memory
//! sparks, prompt, model call, parse/normalize, derive writes, execute
//! writes, audit. Fatal failures abort before any write. Writes execute in
//! fixed order (quest, combat, POI, narrative); each is attempted at most
//! once and failures never skip a later write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::audit::{TurnAuditStore, TurnDisposition, TurnRecord};
use crate::config::{Config, PolicyConfig, PolicyConfigManager};
use crate::journey::{
    CharacterContext, CombatState, HealthStatus, JourneyLog, NarrativeTurn, PoiCreate, Quest,
};
use crate::limits::{CharacterRateLimiter, ModelGate};
use crate::llm::{GenerationRequest, NarrativeModel, TokenSink};
use crate::observability::redact::filter_extension_fields;
use crate::observability::{RuntimeMetrics, TurnLogSampler};
use crate::outcome::normalize::{
    FALLBACK_POI_DESCRIPTION, FALLBACK_POI_NAME, FALLBACK_QUEST_SUMMARY, FALLBACK_QUEST_TITLE,
};
use crate::outcome::{
    normalize_outcome, parse_outcome, CombatAction, Intents, ParsedOutcome, PoiAction,
    QuestAction,
};
use crate::policy::{self, PolicyDecisions, RngPool};
use crate::prompt;
use crate::retry::{retry_async, RetryPolicy};
use crate::types::{CharacterId, JourneyLogError, TraceId, TurnError, TurnId};

use super::summary::{SubsystemOutcome, TurnFailure, TurnResult, TurnSummary};

/// One turn submission.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub character_id: CharacterId,
    pub player_action: String,
    pub trace_id: Option<TraceId>,
    pub dry_run: bool,
}

impl TurnRequest {
    pub fn new(character_id: CharacterId, player_action: impl Into<String>) -> Self {
        Self {
            character_id,
            player_action: player_action.into(),
            trace_id: None,
            dry_run: false,
        }
    }

    pub fn with_trace(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// The quest mutation implied by a quest intent.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum QuestWrite {
    Put(Quest),
    Delete,
}

/// Writes derived from the parsed outcome after gating. Execution order is
/// always quest, combat, POI, narrative.
#[derive(Debug, Clone, Default)]
pub(crate) struct PlannedWrites {
    pub quest: Option<(&'static str, QuestWrite)>,
    pub combat: Option<(&'static str, CombatState)>,
    pub poi: Option<(&'static str, PoiCreate)>,
    pub narrative: Option<NarrativeTurn>,
}

/// Apply the gating rules: an intent becomes a write only when the schema
/// was valid, the policy roll allows it and the context state is consistent
/// with it.
pub(crate) fn derive_writes(
    parsed: &ParsedOutcome,
    decisions: &PolicyDecisions,
    context: &CharacterContext,
    config: &PolicyConfig,
    player_action: &str,
) -> PlannedWrites {
    let mut planned = PlannedWrites::default();

    if !parsed.narrative.is_empty() {
        planned.narrative = Some(NarrativeTurn {
            player_action: player_action.to_string(),
            response: parsed.narrative.clone(),
        });
    }

    let dead_block = config.enforce_dead_character && context.status == HealthStatus::Dead;
    let intents = match (&parsed.intents, parsed.schema_valid, dead_block) {
        (Some(intents), true, false) => intents,
        _ => return planned,
    };

    if let Some(quest) = &intents.quest {
        match quest.action {
            QuestAction::Offer if decisions.quest.passed && context.active_quest.is_none() => {
                planned.quest = Some((
                    "offered",
                    QuestWrite::Put(Quest {
                        title: quest
                            .title
                            .clone()
                            .unwrap_or_else(|| FALLBACK_QUEST_TITLE.to_string()),
                        summary: quest
                            .summary
                            .clone()
                            .unwrap_or_else(|| FALLBACK_QUEST_SUMMARY.to_string()),
                        details: quest.details.clone().unwrap_or_else(|| serde_json::json!({})),
                        requirements: Vec::new(),
                    }),
                ));
            }
            QuestAction::Complete if context.active_quest.is_some() => {
                planned.quest = Some(("completed", QuestWrite::Delete));
            }
            QuestAction::Abandon if context.active_quest.is_some() => {
                planned.quest = Some(("abandoned", QuestWrite::Delete));
            }
            _ => {}
        }
    }

    if let Some(combat) = &intents.combat {
        match combat.action {
            CombatAction::Start if context.combat.is_none() => {
                planned.combat = Some((
                    "started",
                    CombatState {
                        turn: 1,
                        enemies: combat.enemies.clone().unwrap_or_default(),
                    },
                ));
            }
            CombatAction::Continue => {
                if let Some(current) = &context.combat {
                    planned.combat = Some((
                        "continued",
                        CombatState {
                            turn: current.turn + 1,
                            enemies: combat
                                .enemies
                                .clone()
                                .unwrap_or_else(|| current.enemies.clone()),
                        },
                    ));
                }
            }
            CombatAction::End => {
                if let Some(current) = &context.combat {
                    planned.combat = Some((
                        "ended",
                        CombatState {
                            turn: current.turn + 1,
                            enemies: Vec::new(),
                        },
                    ));
                }
            }
            _ => {}
        }
    }

    if let Some(poi) = &intents.poi {
        if poi.action == PoiAction::Create && decisions.poi.passed {
            planned.poi = Some((
                "created",
                PoiCreate {
                    name: poi
                        .name
                        .clone()
                        .unwrap_or_else(|| FALLBACK_POI_NAME.to_string()),
                    description: poi
                        .description
                        .clone()
                        .unwrap_or_else(|| FALLBACK_POI_DESCRIPTION.to_string()),
                    tags: poi.tags.clone().unwrap_or_default(),
                },
            ));
        }
    }

    planned
}

/// Model-supplied fields attached to the turn-completion log: the meta
/// intent's mood plus its `key=value` flags. Keys that would shadow a
/// runtime-owned log field are dropped before emission.
fn extension_fields(intents: Option<&Intents>) -> Vec<(&str, &str)> {
    let Some(meta) = intents.and_then(|intents| intents.meta.as_ref()) else {
        return Vec::new();
    };
    let mut fields = Vec::new();
    if let Some(mood) = meta.player_mood.as_deref() {
        fields.push(("player_mood", mood));
    }
    for flag in meta.flags.iter().flatten() {
        match flag.split_once('=') {
            Some((key, value)) => fields.push((key.trim(), value.trim())),
            None => fields.push((flag.as_str(), "true")),
        }
    }
    filter_extension_fields(fields)
}

/// Labeled per-phase wall-clock timings.
struct PhaseTimer {
    phases: Vec<(String, u64)>,
}

impl PhaseTimer {
    fn new() -> Self {
        Self { phases: Vec::new() }
    }

    async fn time<T>(&mut self, label: &str, fut: impl std::future::Future<Output = T>) -> T {
        let started = Instant::now();
        let out = fut.await;
        self.phases
            .push((label.to_string(), started.elapsed().as_millis() as u64));
        out
    }

    fn into_inner(self) -> Vec<(String, u64)> {
        self.phases
    }
}

/// Sequences the per-turn phases over the injected collaborators.
pub struct TurnOrchestrator {
    journey: Arc<dyn JourneyLog>,
    model: Arc<dyn NarrativeModel>,
    policy: Arc<PolicyConfigManager>,
    rate_limiter: CharacterRateLimiter,
    model_gate: ModelGate,
    rng: RngPool,
    fetch_retry: RetryPolicy,
    model_retry: RetryPolicy,
    audit: Arc<TurnAuditStore>,
    metrics: Arc<RuntimeMetrics>,
    sampler: TurnLogSampler,
    recent_n: usize,
    /// Bounds both waiting for a model permit and the call itself.
    model_timeout: std::time::Duration,
}

impl TurnOrchestrator {
    pub fn new(
        config: &Config,
        journey: Arc<dyn JourneyLog>,
        model: Arc<dyn NarrativeModel>,
        policy: Arc<PolicyConfigManager>,
        audit: Arc<TurnAuditStore>,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            journey,
            model,
            rate_limiter: CharacterRateLimiter::new(
                config.limits.max_turns_per_character_per_second,
            ),
            model_gate: ModelGate::new(config.limits.max_concurrent_llm_calls),
            // The RNG seed is read once at construction; policy reloads do
            // not reseed streams already in flight.
            rng: RngPool::new(config.policy.rng_seed),
            fetch_retry: RetryPolicy::new(
                config.journey_log.max_retries,
                std::time::Duration::from_millis(config.journey_log.retry_delay_base_ms),
                std::time::Duration::from_millis(config.journey_log.retry_delay_max_ms),
            ),
            model_retry: RetryPolicy::new(
                config.llm.max_retries,
                std::time::Duration::from_millis(config.llm.retry_delay_base_ms),
                std::time::Duration::from_millis(config.llm.retry_delay_max_ms),
            ),
            sampler: TurnLogSampler::new(config.logging.turn_log_sampling_rate),
            recent_n: config.journey_log.recent_n,
            model_timeout: std::time::Duration::from_secs(config.llm.timeout_seconds),
            policy,
            audit,
            metrics,
        }
    }

    /// Process one turn synchronously.
    pub async fn process(&self, request: TurnRequest) -> Result<TurnResult, TurnFailure> {
        self.process_inner(request, None).await
    }

    /// Process one turn, forwarding model tokens to `sink` as they arrive.
    /// Sink failures are non-fatal; the turn always runs to completion.
    pub async fn process_streaming(
        &self,
        request: TurnRequest,
        sink: TokenSink,
    ) -> Result<TurnResult, TurnFailure> {
        self.process_inner(request, Some(sink)).await
    }

    async fn process_inner(
        &self,
        request: TurnRequest,
        sink: Option<TokenSink>,
    ) -> Result<TurnResult, TurnFailure> {
        let trace_id = request.trace_id.clone().unwrap_or_default();
        let turn_id = TurnId::new();
        let policy_config = self.policy.snapshot();
        let mut timer = PhaseTimer::new();

        // Phase 1: admit.
        if let Err(wait) = self.rate_limiter.acquire(&request.character_id) {
            RuntimeMetrics::incr(&self.metrics.turns_rate_limited);
            let error = TurnError::RateLimited {
                retry_after_seconds: wait.as_secs_f64(),
            };
            tracing::info!(
                trace_id = %trace_id,
                character_id = %request.character_id,
                retry_after_s = wait.as_secs_f64(),
                "turn rejected by rate limiter"
            );
            return Err(TurnFailure::from_error(trace_id, &error));
        }
        RuntimeMetrics::incr(&self.metrics.turns_started);
        tracing::info!(
            trace_id = %trace_id,
            character_id = %request.character_id,
            turn_id = %turn_id,
            dry_run = request.dry_run,
            "turn admitted"
        );

        // Phase 2: fetch context.
        let context = timer
            .time(
                "fetch_context",
                retry_async(&self.fetch_retry, "fetch_context", |_| {
                    self.journey.context(
                        &trace_id,
                        &request.character_id,
                        self.recent_n,
                        false,
                    )
                }),
            )
            .await;
        let mut context = match context {
            Ok(context) => context,
            Err(e) => {
                let error = match e {
                    JourneyLogError::CharacterNotFound { character_id } => {
                        TurnError::CharacterNotFound { character_id }
                    }
                    other => TurnError::ContextFetch(other),
                };
                return Err(self.abort(turn_id, trace_id, &request, None, timer, error));
            }
        };

        // Phase 3: policy decisions.
        let rng = self.rng.for_character(&request.character_id);
        let decisions = policy::decide(&policy_config, &context, &rng);

        // Phase 4: memory sparks (non-fatal).
        if decisions.sparks.fetch {
            RuntimeMetrics::incr(&self.metrics.spark_fetches);
            let sparks = timer
                .time(
                    "fetch_sparks",
                    retry_async(&self.fetch_retry, "fetch_sparks", |_| {
                        self.journey.random_pois(
                            &trace_id,
                            &request.character_id,
                            decisions.sparks.count,
                        )
                    }),
                )
                .await;
            match sparks {
                Ok(pois) => context.memory_sparks = pois,
                Err(e) => {
                    RuntimeMetrics::incr(&self.metrics.spark_fetch_failures);
                    tracing::warn!(
                        trace_id = %trace_id,
                        error = %e,
                        "memory spark fetch failed; continuing without sparks"
                    );
                }
            }
        }

        // Phase 5: build the prompt.
        let built = prompt::build_prompt(&context, &decisions, &policy_config, &rng);
        let built = prompt::with_player_action(built, &request.player_action);
        let generation = GenerationRequest {
            system: built.system,
            user: built.user,
            trace_id: trace_id.clone(),
        };

        // Phase 6: model call under the global gate.
        let permit =
            match tokio::time::timeout(self.model_timeout, self.model_gate.acquire()).await {
                Ok(Some(permit)) => permit,
                Ok(None) => {
                    let error = TurnError::Model(crate::types::LlmError::Transport(
                        "model gate closed".to_string(),
                    ));
                    return Err(
                        self.abort(turn_id, trace_id, &request, Some(decisions), timer, error)
                    );
                }
                Err(_) => {
                    let error = TurnError::Model(crate::types::LlmError::Timeout);
                    return Err(
                        self.abort(turn_id, trace_id, &request, Some(decisions), timer, error)
                    );
                }
            };
        let raw = timer
            .time("model_call", self.call_model(&generation, sink))
            .await;
        drop(permit);
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                let error = TurnError::Model(e);
                return Err(self.abort(turn_id, trace_id, &request, Some(decisions), timer, error));
            }
        };

        // Phase 7: parse and normalize.
        let mut parsed = parse_outcome(&raw);
        if parsed.schema_valid {
            RuntimeMetrics::incr(&self.metrics.outcomes_schema_valid);
        } else {
            RuntimeMetrics::incr(&self.metrics.outcomes_schema_invalid);
        }
        normalize_outcome(&mut parsed, &decisions, &context);

        // Phase 8: derive writes.
        let planned = derive_writes(
            &parsed,
            &decisions,
            &context,
            &policy_config,
            &request.player_action,
        );

        // Phase 9: execute writes in fixed order.
        let summary = self
            .execute_writes(&mut timer, &trace_id, &request, planned)
            .await;

        // Phase 10: assemble, audit, log.
        let disposition = if !parsed.schema_valid || summary.any_write_failed() {
            TurnDisposition::Partial
        } else {
            TurnDisposition::Success
        };
        RuntimeMetrics::incr(&self.metrics.turns_completed);

        let result = TurnResult {
            turn_id,
            trace_id: trace_id.clone(),
            narrative: parsed.narrative.clone(),
            intents: parsed.intents.clone(),
            summary: summary.clone(),
        };

        let phases = timer.into_inner();
        if self.sampler.should_log() {
            let extensions = extension_fields(parsed.intents.as_ref());
            tracing::info!(
                trace_id = %trace_id,
                character_id = %request.character_id,
                turn_id = %turn_id,
                disposition = ?disposition,
                schema_valid = parsed.schema_valid,
                quest = %summary.quest.action,
                combat = %summary.combat.action,
                poi = %summary.poi.action,
                narrative_persisted = summary.narrative_persisted,
                extensions = ?extensions,
                "turn completed"
            );
        }

        self.audit.insert(TurnRecord {
            turn_id,
            character_id: request.character_id.clone(),
            trace_id,
            disposition,
            decisions: Some(decisions),
            summary: Some(summary),
            narrative: parsed.narrative,
            phase_latencies_ms: phases,
            error: parsed.failure.as_ref().map(|f| f.to_string()),
            created_at: Utc::now(),
        });

        Ok(result)
    }

    /// Invoke the model, single-shot or streaming. Streaming attempts are
    /// only retried while no token has reached the caller's sink, so a
    /// retry can never duplicate delivered text.
    async fn call_model(
        &self,
        generation: &GenerationRequest,
        sink: Option<TokenSink>,
    ) -> Result<String, crate::types::LlmError> {
        let Some(sink) = sink else {
            return retry_async(&self.model_retry, "model_generate", |_| {
                self.model.generate(generation)
            })
            .await;
        };

        let mut attempt = 1;
        loop {
            let (tx, mut rx) = mpsc::channel::<String>(64);
            let outer = sink.clone();
            let delivered = Arc::new(AtomicBool::new(false));
            let delivered_flag = Arc::clone(&delivered);
            let forwarder = tokio::spawn(async move {
                let mut client_gone = false;
                while let Some(token) = rx.recv().await {
                    delivered_flag.store(true, Ordering::Relaxed);
                    if !client_gone && outer.send(token).await.is_err() {
                        client_gone = true;
                    }
                }
            });

            let result = self.model.generate_stream(generation, tx).await;
            let _ = forwarder.await;

            match result {
                Ok(text) => return Ok(text),
                Err(e)
                    if e.is_retryable()
                        && attempt < self.model_retry.max_attempts
                        && !delivered.load(Ordering::Relaxed) =>
                {
                    let delay = self.model_retry.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "streaming model call failed before first token, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Execute the planned writes in (quest, combat, POI, narrative) order.
    /// Each write is attempted exactly once; a failure is recorded and the
    /// next write still runs. Dry-run records the would-write actions only.
    async fn execute_writes(
        &self,
        timer: &mut PhaseTimer,
        trace_id: &TraceId,
        request: &TurnRequest,
        planned: PlannedWrites,
    ) -> TurnSummary {
        let mut summary = TurnSummary::empty(request.dry_run);
        let character_id = &request.character_id;

        if let Some((label, write)) = planned.quest {
            summary.quest = if request.dry_run {
                SubsystemOutcome::planned(label)
            } else {
                let result = timer
                    .time("write_quest", async {
                        match &write {
                            QuestWrite::Put(quest) => {
                                self.journey.put_quest(trace_id, character_id, quest).await
                            }
                            QuestWrite::Delete => {
                                self.journey.delete_quest(trace_id, character_id).await
                            }
                        }
                    })
                    .await;
                self.record_write(trace_id, "quest", label, result)
            };
        }

        if let Some((label, combat)) = planned.combat {
            summary.combat = if request.dry_run {
                SubsystemOutcome::planned(label)
            } else {
                let result = timer
                    .time(
                        "write_combat",
                        self.journey.put_combat(trace_id, character_id, &combat),
                    )
                    .await;
                self.record_write(trace_id, "combat", label, result)
            };
        }

        if let Some((label, poi)) = planned.poi {
            summary.poi = if request.dry_run {
                SubsystemOutcome::planned(label)
            } else {
                let result = timer
                    .time(
                        "write_poi",
                        self.journey.post_poi(trace_id, character_id, &poi),
                    )
                    .await;
                self.record_write(trace_id, "poi", label, result)
            };
        }

        if let Some(narrative) = planned.narrative {
            if !request.dry_run {
                RuntimeMetrics::incr(&self.metrics.writes_attempted);
                let result = timer
                    .time(
                        "write_narrative",
                        self.journey
                            .post_narrative(trace_id, character_id, &narrative),
                    )
                    .await;
                match result {
                    Ok(()) => {
                        RuntimeMetrics::incr(&self.metrics.writes_succeeded);
                        summary.narrative_persisted = true;
                    }
                    Err(e) => {
                        RuntimeMetrics::incr(&self.metrics.writes_failed);
                        tracing::warn!(trace_id = %trace_id, error = %e, "narrative write failed");
                        summary.narrative_error = Some(e.to_string());
                    }
                }
            }
        }

        summary
    }

    fn record_write(
        &self,
        trace_id: &TraceId,
        subsystem: &str,
        label: &str,
        result: Result<(), JourneyLogError>,
    ) -> SubsystemOutcome {
        RuntimeMetrics::incr(&self.metrics.writes_attempted);
        match result {
            Ok(()) => {
                RuntimeMetrics::incr(&self.metrics.writes_succeeded);
                SubsystemOutcome::succeeded(label)
            }
            Err(e) => {
                RuntimeMetrics::incr(&self.metrics.writes_failed);
                tracing::warn!(
                    trace_id = %trace_id,
                    subsystem,
                    error = %e,
                    "subsystem write failed"
                );
                SubsystemOutcome::failed(label, e.to_string())
            }
        }
    }

    /// Record a fatal abort and build the caller-facing failure.
    fn abort(
        &self,
        turn_id: TurnId,
        trace_id: TraceId,
        request: &TurnRequest,
        decisions: Option<PolicyDecisions>,
        timer: PhaseTimer,
        error: TurnError,
    ) -> TurnFailure {
        RuntimeMetrics::incr(&self.metrics.turns_failed);
        tracing::warn!(
            trace_id = %trace_id,
            character_id = %request.character_id,
            turn_id = %turn_id,
            kind = error.kind(),
            error = %error,
            "turn aborted"
        );
        self.audit.insert(TurnRecord {
            turn_id,
            character_id: request.character_id.clone(),
            trace_id: trace_id.clone(),
            disposition: TurnDisposition::Error,
            decisions,
            summary: None,
            narrative: String::new(),
            phase_latencies_ms: timer.into_inner(),
            error: Some(error.to_string()),
            created_at: Utc::now(),
        });
        TurnFailure::from_error(trace_id, &error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journey::{Enemy, Location, PolicyCounters};
    use crate::outcome::{CombatIntent, Intents, MetaIntent, PoiIntent, QuestIntent};
    use crate::policy::CharacterRng;

    fn context(status: HealthStatus) -> CharacterContext {
        CharacterContext {
            character_id: CharacterId::new("hero"),
            status,
            location: Location {
                id: "loc-1".into(),
                display_name: "The Sunken Vault".into(),
            },
            active_quest: None,
            combat: None,
            recent_history: Vec::new(),
            policy: PolicyCounters {
                turns_since_last_quest: 100,
                turns_since_last_poi: 100,
            },
            memory_sparks: Vec::new(),
        }
    }

    fn policy_config(quest_p: f64, poi_p: f64) -> PolicyConfig {
        PolicyConfig {
            quest_trigger_probability: quest_p,
            poi_trigger_probability: poi_p,
            quest_cooldown_turns: 0,
            poi_cooldown_turns: 0,
            memory_spark_probability: 0.0,
            ..Default::default()
        }
    }

    fn rng() -> CharacterRng {
        RngPool::new(Some(7)).for_character(&CharacterId::new("hero"))
    }

    fn decisions(quest_p: f64, poi_p: f64, ctx: &CharacterContext) -> PolicyDecisions {
        policy::decide(&policy_config(quest_p, poi_p), ctx, &rng())
    }

    fn parsed(intents: Option<Intents>) -> ParsedOutcome {
        ParsedOutcome {
            narrative: "You proceed.".into(),
            intents,
            schema_valid: true,
            failure: None,
        }
    }

    fn offer_intents() -> Intents {
        Intents {
            quest: Some(QuestIntent {
                action: QuestAction::Offer,
                title: Some("T".into()),
                summary: Some("S".into()),
                details: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_quest_offer_gated_by_policy_roll() {
        let ctx = context(HealthStatus::Healthy);
        let cfg = policy_config(0.0, 0.0);

        let allowed = derive_writes(
            &parsed(Some(offer_intents())),
            &decisions(1.0, 0.0, &ctx),
            &ctx,
            &cfg,
            "go",
        );
        assert!(matches!(
            allowed.quest,
            Some(("offered", QuestWrite::Put(_)))
        ));

        let blocked = derive_writes(
            &parsed(Some(offer_intents())),
            &decisions(0.0, 0.0, &ctx),
            &ctx,
            &cfg,
            "go",
        );
        assert!(blocked.quest.is_none());
        // Narrative still planned either way.
        assert!(blocked.narrative.is_some());
    }

    #[test]
    fn test_quest_offer_blocked_by_active_quest() {
        let mut ctx = context(HealthStatus::Healthy);
        ctx.active_quest = Some(Quest {
            title: "old".into(),
            summary: "old".into(),
            details: serde_json::Value::Null,
            requirements: Vec::new(),
        });
        // Policy already refuses (active quest), but even a passed roll
        // would be blocked by the context check.
        let mut fake = decisions(1.0, 0.0, &context(HealthStatus::Healthy));
        fake.quest.passed = true;
        let planned = derive_writes(
            &parsed(Some(offer_intents())),
            &fake,
            &ctx,
            &policy_config(1.0, 0.0),
            "go",
        );
        assert!(planned.quest.is_none());
    }

    #[test]
    fn test_quest_complete_requires_active_quest() {
        let intents = Intents {
            quest: Some(QuestIntent {
                action: QuestAction::Complete,
                ..Default::default()
            }),
            ..Default::default()
        };
        let ctx = context(HealthStatus::Healthy);
        let planned = derive_writes(
            &parsed(Some(intents.clone())),
            &decisions(0.0, 0.0, &ctx),
            &ctx,
            &policy_config(0.0, 0.0),
            "go",
        );
        assert!(planned.quest.is_none());

        let mut ctx = context(HealthStatus::Healthy);
        ctx.active_quest = Some(Quest {
            title: "old".into(),
            summary: "old".into(),
            details: serde_json::Value::Null,
            requirements: Vec::new(),
        });
        let planned = derive_writes(
            &parsed(Some(intents)),
            &decisions(0.0, 0.0, &ctx),
            &ctx,
            &policy_config(0.0, 0.0),
            "go",
        );
        assert_eq!(planned.quest, Some(("completed", QuestWrite::Delete)));
    }

    #[test]
    fn test_combat_transitions_consistent_with_context() {
        let start = Intents {
            combat: Some(CombatIntent {
                action: CombatAction::Start,
                enemies: Some(vec![Enemy {
                    name: "Wight".into(),
                    hp: 10,
                    max_hp: 10,
                    weapon: None,
                    status: None,
                }]),
                notes: None,
            }),
            ..Default::default()
        };
        let ctx = context(HealthStatus::Healthy);
        let planned = derive_writes(
            &parsed(Some(start.clone())),
            &decisions(0.0, 0.0, &ctx),
            &ctx,
            &policy_config(0.0, 0.0),
            "go",
        );
        let (label, state) = planned.combat.unwrap();
        assert_eq!(label, "started");
        assert_eq!(state.turn, 1);
        assert_eq!(state.enemies.len(), 1);

        // Start is inconsistent when combat is already running.
        let mut in_combat = context(HealthStatus::Healthy);
        in_combat.combat = Some(CombatState {
            turn: 3,
            enemies: Vec::new(),
        });
        let planned = derive_writes(
            &parsed(Some(start)),
            &decisions(0.0, 0.0, &in_combat),
            &in_combat,
            &policy_config(0.0, 0.0),
            "go",
        );
        assert!(planned.combat.is_none());

        // End bumps the turn and clears enemies.
        let end = Intents {
            combat: Some(CombatIntent {
                action: CombatAction::End,
                enemies: None,
                notes: None,
            }),
            ..Default::default()
        };
        let planned = derive_writes(
            &parsed(Some(end)),
            &decisions(0.0, 0.0, &in_combat),
            &in_combat,
            &policy_config(0.0, 0.0),
            "go",
        );
        let (label, state) = planned.combat.unwrap();
        assert_eq!(label, "ended");
        assert_eq!(state.turn, 4);
        assert!(state.enemies.is_empty());
    }

    #[test]
    fn test_poi_create_gated_by_roll() {
        let intents = Intents {
            poi: Some(PoiIntent {
                action: PoiAction::Create,
                name: Some("Old Mill".into()),
                description: Some("A mill.".into()),
                tags: Some(vec!["landmark".into()]),
            }),
            ..Default::default()
        };
        let ctx = context(HealthStatus::Healthy);

        let allowed = derive_writes(
            &parsed(Some(intents.clone())),
            &decisions(0.0, 1.0, &ctx),
            &ctx,
            &policy_config(0.0, 1.0),
            "go",
        );
        let (label, poi) = allowed.poi.unwrap();
        assert_eq!(label, "created");
        assert_eq!(poi.name, "Old Mill");

        let blocked = derive_writes(
            &parsed(Some(intents)),
            &decisions(0.0, 0.0, &ctx),
            &ctx,
            &policy_config(0.0, 0.0),
            "go",
        );
        assert!(blocked.poi.is_none());
    }

    #[test]
    fn test_schema_invalid_plans_narrative_only() {
        let mut invalid = parsed(Some(offer_intents()));
        invalid.schema_valid = false;
        let ctx = context(HealthStatus::Healthy);
        let planned = derive_writes(
            &invalid,
            &decisions(1.0, 1.0, &ctx),
            &ctx,
            &policy_config(1.0, 1.0),
            "go",
        );
        assert!(planned.quest.is_none());
        assert!(planned.combat.is_none());
        assert!(planned.poi.is_none());
        assert!(planned.narrative.is_some());
    }

    #[test]
    fn test_dead_character_enforcement_flag() {
        let ctx = context(HealthStatus::Dead);
        // Force a passed quest roll to isolate the enforcement check.
        let mut forced = decisions(1.0, 1.0, &context(HealthStatus::Healthy));
        forced.quest.passed = true;
        forced.poi.passed = true;

        let mut config = policy_config(1.0, 1.0);
        config.enforce_dead_character = false;
        let relaxed = derive_writes(&parsed(Some(offer_intents())), &forced, &ctx, &config, "go");
        // Default behavior: the model's intents still pass context gating.
        assert!(relaxed.quest.is_some());

        config.enforce_dead_character = true;
        let enforced = derive_writes(&parsed(Some(offer_intents())), &forced, &ctx, &config, "go");
        assert!(enforced.quest.is_none());
        assert!(enforced.narrative.is_some());
    }

    #[test]
    fn test_extension_fields_drop_reserved_keys() {
        let intents = Intents {
            meta: Some(MetaIntent {
                player_mood: Some("curious".into()),
                pacing: None,
                flags: Some(vec![
                    "trace_id=spoofed".into(),
                    "omen=raven".into(),
                    "haunted".into(),
                ]),
            }),
            ..Default::default()
        };
        let fields = extension_fields(Some(&intents));
        assert_eq!(
            fields,
            vec![
                ("player_mood", "curious"),
                ("omen", "raven"),
                ("haunted", "true"),
            ]
        );

        assert!(extension_fields(None).is_empty());
        assert!(extension_fields(Some(&Intents::default())).is_empty());
    }

    #[test]
    fn test_narrative_always_planned_when_non_empty() {
        let ctx = context(HealthStatus::Healthy);
        let planned = derive_writes(
            &parsed(None),
            &decisions(0.0, 0.0, &ctx),
            &ctx,
            &policy_config(0.0, 0.0),
            "I wait.",
        );
        let narrative = planned.narrative.unwrap();
        assert_eq!(narrative.player_action, "I wait.");
        assert_eq!(narrative.response, "You proceed.");
    }
}
