//! Deterministic policy decisions for one turn.
//!
//! Pure apart from the roll source: given the same configuration, context
//! and random stream, the decisions are identical. Draws happen in a fixed
//! order (quest, POI, spark) and only for eligible subsystems, so a seeded
//! replay consumes the stream identically.
//!
//! Adding a subsystem means adding a sub-decision here and a gating clause
//! in the orchestrator; the `decide` signature does not change.

use serde::Serialize;

use crate::config::PolicyConfig;
use crate::journey::CharacterContext;

use super::rng::CharacterRng;

/// One gated subsystem's eligibility and roll.
#[derive(Debug, Clone, Serialize)]
pub struct SubsystemRoll {
    pub eligible: bool,
    /// Why the subsystem was ineligible; empty when eligible.
    pub reasons: Vec<String>,
    pub probability: f64,
    /// The value drawn, when a draw happened.
    pub roll: Option<f64>,
    pub passed: bool,
}

impl SubsystemRoll {
    fn ineligible(probability: f64, reasons: Vec<String>) -> Self {
        Self {
            eligible: false,
            reasons,
            probability,
            roll: None,
            passed: false,
        }
    }

    fn rolled(probability: f64, roll: f64) -> Self {
        Self {
            eligible: true,
            reasons: Vec::new(),
            probability,
            roll: Some(roll),
            passed: roll < probability,
        }
    }

    /// Human-readable reason for the prompt's policy hint when blocked.
    pub fn blocked_reason(&self) -> Option<&str> {
        if self.passed {
            return None;
        }
        match self.reasons.first() {
            Some(reason) => Some(reason.as_str()),
            None => Some("the trigger roll did not pass"),
        }
    }
}

/// Whether memory sparks should be fetched this turn.
#[derive(Debug, Clone, Serialize)]
pub struct SparkDecision {
    pub enabled: bool,
    pub probability: f64,
    pub roll: Option<f64>,
    pub fetch: bool,
    /// How many random POIs to request when fetching.
    pub count: usize,
}

/// The complete, append-only decision record for one turn.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyDecisions {
    pub quest: SubsystemRoll,
    pub poi: SubsystemRoll,
    pub sparks: SparkDecision,
}

/// Compute this turn's policy decisions. Fixed draw order: quest, POI,
/// spark; ineligible subsystems consume no draw.
pub fn decide(
    config: &PolicyConfig,
    context: &CharacterContext,
    rng: &CharacterRng,
) -> PolicyDecisions {
    let quest = decide_quest(config, context, rng);
    let poi = decide_poi(config, context, rng);
    let sparks = decide_sparks(config, rng);
    PolicyDecisions { quest, poi, sparks }
}

fn decide_quest(
    config: &PolicyConfig,
    context: &CharacterContext,
    rng: &CharacterRng,
) -> SubsystemRoll {
    let mut reasons = Vec::new();
    if context.active_quest.is_some() {
        reasons.push("a quest is already active".to_string());
    }
    if !context.status.is_active() {
        reasons.push("character is not healthy or wounded".to_string());
    }
    if context.combat.is_some() {
        reasons.push("combat is in progress".to_string());
    }
    if context.policy.turns_since_last_quest < config.quest_cooldown_turns {
        reasons.push(format!(
            "quest cooldown active ({} of {} turns)",
            context.policy.turns_since_last_quest, config.quest_cooldown_turns
        ));
    }

    if reasons.is_empty() {
        SubsystemRoll::rolled(config.quest_trigger_probability, rng.roll())
    } else {
        SubsystemRoll::ineligible(config.quest_trigger_probability, reasons)
    }
}

fn decide_poi(
    config: &PolicyConfig,
    context: &CharacterContext,
    rng: &CharacterRng,
) -> SubsystemRoll {
    let mut reasons = Vec::new();
    if !context.status.is_active() {
        reasons.push("character is not healthy or wounded".to_string());
    }
    if context.policy.turns_since_last_poi < config.poi_cooldown_turns {
        reasons.push(format!(
            "point-of-interest cooldown active ({} of {} turns)",
            context.policy.turns_since_last_poi, config.poi_cooldown_turns
        ));
    }

    if reasons.is_empty() {
        SubsystemRoll::rolled(config.poi_trigger_probability, rng.roll())
    } else {
        SubsystemRoll::ineligible(config.poi_trigger_probability, reasons)
    }
}

fn decide_sparks(config: &PolicyConfig, rng: &CharacterRng) -> SparkDecision {
    if !config.memory_sparks_enabled {
        return SparkDecision {
            enabled: false,
            probability: config.memory_spark_probability,
            roll: None,
            fetch: false,
            count: config.memory_spark_count,
        };
    }
    let roll = rng.roll();
    SparkDecision {
        enabled: true,
        probability: config.memory_spark_probability,
        roll: Some(roll),
        fetch: roll < config.memory_spark_probability,
        count: config.memory_spark_count,
    }
}
