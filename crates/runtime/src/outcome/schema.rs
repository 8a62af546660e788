//! The outcome JSON Schema and its pre-compiled validator.
//!
//! The same schema document is sent to the provider as the structured-output
//! contract and used locally to validate whatever comes back. Version bumps
//! happen here and are logged with every validation failure.

use std::sync::OnceLock;

/// Schema name sent to the provider's structured-output interface.
pub const OUTCOME_SCHEMA_NAME: &str = "turn_outcome";

/// Logged alongside field-level validation errors.
pub const OUTCOME_SCHEMA_VERSION: &str = "v1";

/// JSON Schema for [`crate::outcome::ModelOutcome`].
pub fn outcome_json_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "narrative": { "type": "string", "minLength": 1 },
            "intents": {
                "type": ["object", "null"],
                "properties": {
                    "quest": {
                        "type": ["object", "null"],
                        "properties": {
                            "action": { "type": "string", "enum": ["none", "offer", "complete", "abandon"] },
                            "title": { "type": ["string", "null"] },
                            "summary": { "type": ["string", "null"] },
                            "details": { "type": ["object", "null"] }
                        }
                    },
                    "combat": {
                        "type": ["object", "null"],
                        "properties": {
                            "action": { "type": "string", "enum": ["none", "start", "continue", "end"] },
                            "enemies": {
                                "type": ["array", "null"],
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "name": { "type": "string" },
                                        "hp": { "type": "integer" },
                                        "max_hp": { "type": "integer" },
                                        "weapon": { "type": ["string", "null"] },
                                        "status": { "type": ["string", "null"] }
                                    },
                                    "required": ["name", "hp", "max_hp"]
                                }
                            },
                            "notes": { "type": ["string", "null"] }
                        }
                    },
                    "poi": {
                        "type": ["object", "null"],
                        "properties": {
                            "action": { "type": "string", "enum": ["none", "create", "reference"] },
                            "name": { "type": ["string", "null"] },
                            "description": { "type": ["string", "null"] },
                            "tags": { "type": ["array", "null"], "items": { "type": "string" } }
                        }
                    },
                    "meta": {
                        "type": ["object", "null"],
                        "properties": {
                            "player_mood": { "type": ["string", "null"] },
                            "pacing": { "type": ["string", "null"], "enum": ["slow", "normal", "fast", null] },
                            "flags": { "type": ["array", "null"], "items": { "type": "string" } }
                        }
                    }
                }
            }
        },
        "required": ["narrative"]
    })
}

/// The pre-compiled validator. `None` only if the embedded schema document
/// itself is malformed, in which case callers fall back to serde-level
/// validation.
pub fn validator() -> Option<&'static jsonschema::Validator> {
    static VALIDATOR: OnceLock<Option<jsonschema::Validator>> = OnceLock::new();
    VALIDATOR
        .get_or_init(|| match jsonschema::validator_for(&outcome_json_schema()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::error!(schema_version = OUTCOME_SCHEMA_VERSION, error = %e, "outcome schema failed to compile");
                None
            }
        })
        .as_ref()
}
