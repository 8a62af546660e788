//! Parse untrusted model output into a [`ParsedOutcome`].
//!
//! Layered pipeline: strip markdown fences, decode JSON, validate against
//! the outcome schema, deserialize into the typed outcome. Every failure
//! layer degrades to narrative-only rather than erroring: the player still
//! gets prose even when the structured data is garbage.

use std::sync::OnceLock;

use regex::Regex;

use crate::util::truncate_chars;

use super::schema::{validator, OUTCOME_SCHEMA_VERSION};
use super::types::{ModelOutcome, ParseFailure, ParsedOutcome};

/// Shortest raw text worth returning verbatim as a narrative.
const MIN_SALVAGED_CHARS: usize = 20;

/// Salvaged narratives are bounded; the model occasionally dumps pages.
const MAX_SALVAGED_CHARS: usize = 2_000;

/// Shown when nothing narrative-shaped can be recovered at all.
pub const FALLBACK_NARRATIVE: &str =
    "The story continues, though the details of this moment are hazy.";

/// Strip markdown code fences from a string, returning the inner content.
fn strip_markdown_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let content = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        };
        if let Some(stripped) = content.strip_suffix("```") {
            return stripped.trim().to_string();
        }
        return content.trim().to_string();
    }
    trimmed.to_string()
}

/// Pull a narrative out of text that failed to decode: first by key match
/// against a `"narrative": "..."` fragment, then by falling back to the raw
/// text itself when it is long enough to plausibly be prose.
fn salvage_narrative(raw: &str) -> Option<String> {
    static NARRATIVE_KEY: OnceLock<Regex> = OnceLock::new();
    let pattern = NARRATIVE_KEY.get_or_init(|| {
        Regex::new(r#""narrative"\s*:\s*("(?:[^"\\]|\\.)*")"#).expect("static pattern")
    });

    if let Some(captures) = pattern.captures(raw) {
        if let Some(quoted) = captures.get(1) {
            if let Ok(text) = serde_json::from_str::<String>(quoted.as_str()) {
                if !text.trim().is_empty() {
                    return Some(truncate_chars(&text, MAX_SALVAGED_CHARS));
                }
            }
        }
    }

    let trimmed = raw.trim();
    if trimmed.chars().count() >= MIN_SALVAGED_CHARS {
        return Some(truncate_chars(trimmed, MAX_SALVAGED_CHARS));
    }
    None
}

fn narrative_only(narrative: String, failure: ParseFailure) -> ParsedOutcome {
    ParsedOutcome {
        narrative,
        intents: None,
        schema_valid: false,
        failure: Some(failure),
    }
}

/// Parse raw model text. Every path returns a non-empty narrative.
pub fn parse_outcome(raw: &str) -> ParsedOutcome {
    let cleaned = strip_markdown_fences(raw);

    let value: serde_json::Value = match serde_json::from_str(&cleaned) {
        Ok(value) => value,
        Err(e) => {
            let narrative =
                salvage_narrative(&cleaned).unwrap_or_else(|| FALLBACK_NARRATIVE.to_string());
            tracing::warn!(
                schema_version = OUTCOME_SCHEMA_VERSION,
                error = %e,
                "model output was not JSON; narrative salvaged"
            );
            return narrative_only(
                narrative,
                ParseFailure::Decode {
                    message: e.to_string(),
                },
            );
        }
    };

    if let Some(validator) = validator() {
        let errors: Vec<String> = validator
            .iter_errors(&value)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("at '{path}': {e}")
                }
            })
            .collect();
        if !errors.is_empty() {
            tracing::warn!(
                schema_version = OUTCOME_SCHEMA_VERSION,
                errors = ?errors,
                "model output failed schema validation"
            );
            let narrative = value
                .get("narrative")
                .and_then(|n| n.as_str())
                .filter(|n| !n.trim().is_empty())
                .map(|n| truncate_chars(n, MAX_SALVAGED_CHARS))
                .or_else(|| salvage_narrative(&cleaned))
                .unwrap_or_else(|| FALLBACK_NARRATIVE.to_string());
            return narrative_only(narrative, ParseFailure::Schema { errors });
        }
    }

    match serde_json::from_value::<ModelOutcome>(value) {
        Ok(outcome) => {
            let narrative = if outcome.narrative.trim().is_empty() {
                FALLBACK_NARRATIVE.to_string()
            } else {
                outcome.narrative
            };
            ParsedOutcome {
                narrative,
                intents: outcome.intents,
                schema_valid: true,
                failure: None,
            }
        }
        Err(e) => {
            // Schema passed but the typed decode did not; treated the same
            // as a schema violation.
            tracing::warn!(
                schema_version = OUTCOME_SCHEMA_VERSION,
                error = %e,
                "outcome deserialization failed after schema validation"
            );
            let narrative =
                salvage_narrative(&cleaned).unwrap_or_else(|| FALLBACK_NARRATIVE.to_string());
            narrative_only(
                narrative,
                ParseFailure::Schema {
                    errors: vec![e.to_string()],
                },
            )
        }
    }
}
