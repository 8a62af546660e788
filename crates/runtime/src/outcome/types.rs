//! Typed model output: the structured outcome and its intents.
//!
//! Every sub-intent is independently defaultable so a partially filled
//! `intents` block deserializes without error. Unknown fields from the
//! model are dropped by deserialization.

use serde::{Deserialize, Serialize};

use crate::journey::Enemy;

/// What the model proposes for the quest subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuestAction {
    #[default]
    None,
    Offer,
    Complete,
    Abandon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QuestIntent {
    #[serde(default)]
    pub action: QuestAction,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CombatAction {
    #[default]
    None,
    Start,
    Continue,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CombatIntent {
    #[serde(default)]
    pub action: CombatAction,
    #[serde(default)]
    pub enemies: Option<Vec<Enemy>>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PoiAction {
    #[default]
    None,
    Create,
    Reference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PoiIntent {
    #[serde(default)]
    pub action: PoiAction,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Pacing {
    Slow,
    #[default]
    Normal,
    Fast,
}

/// Out-of-band hints about the scene; passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetaIntent {
    #[serde(default)]
    pub player_mood: Option<String>,
    #[serde(default)]
    pub pacing: Option<Pacing>,
    #[serde(default)]
    pub flags: Option<Vec<String>>,
}

/// The optional intents block of a model outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Intents {
    #[serde(default)]
    pub quest: Option<QuestIntent>,
    #[serde(default)]
    pub combat: Option<CombatIntent>,
    #[serde(default)]
    pub poi: Option<PoiIntent>,
    #[serde(default)]
    pub meta: Option<MetaIntent>,
}

/// The outcome document the model is asked to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutcome {
    pub narrative: String,
    #[serde(default)]
    pub intents: Option<Intents>,
}

/// Why structured parsing fell back to narrative-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ParseFailure {
    /// The raw text was not JSON at all.
    Decode { message: String },
    /// The JSON did not conform to the outcome schema.
    Schema { errors: Vec<String> },
}

impl ParseFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            ParseFailure::Decode { .. } => "decode_error",
            ParseFailure::Schema { .. } => "schema_error",
        }
    }
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseFailure::Decode { message } => write!(f, "decode error: {message}"),
            ParseFailure::Schema { errors } => {
                write!(f, "schema error: {}", errors.join("; "))
            }
        }
    }
}

/// What the parser hands the orchestrator: a narrative on every path, and
/// intents only when the document conformed to the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutcome {
    pub narrative: String,
    pub intents: Option<Intents>,
    pub schema_valid: bool,
    pub failure: Option<ParseFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_deserialize_lowercase() {
        let intent: QuestIntent = serde_json::from_str(r#"{"action": "offer"}"#).unwrap();
        assert_eq!(intent.action, QuestAction::Offer);
        let intent: PoiIntent = serde_json::from_str(r#"{"action": "create"}"#).unwrap();
        assert_eq!(intent.action, PoiAction::Create);
    }

    #[test]
    fn test_sub_intents_default_independently() {
        let intents: Intents = serde_json::from_str(r#"{"quest": {"action": "offer"}}"#).unwrap();
        assert!(intents.quest.is_some());
        assert!(intents.combat.is_none());
        assert!(intents.poi.is_none());
        assert!(intents.meta.is_none());
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let outcome: ModelOutcome = serde_json::from_str(
            r#"{"narrative": "n", "intents": {"quest": {"action": "none", "mystery": 1}}, "extra": true}"#,
        )
        .unwrap();
        assert_eq!(outcome.narrative, "n");
    }

    #[test]
    fn test_missing_narrative_fails_deserialization() {
        let result = serde_json::from_str::<ModelOutcome>(r#"{"intents": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_failure_kinds() {
        assert_eq!(
            ParseFailure::Decode {
                message: "x".into()
            }
            .kind(),
            "decode_error"
        );
        assert_eq!(
            ParseFailure::Schema { errors: vec![] }.kind(),
            "schema_error"
        );
    }
}
