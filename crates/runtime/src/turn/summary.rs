//! Per-turn result types returned to the caller.

use serde::Serialize;

use crate::outcome::Intents;
use crate::types::{TraceId, TurnError, TurnId};

/// What happened to one subsystem this turn: an action label, a tri-valued
/// success flag (`None` = not attempted) and the error when it failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsystemOutcome {
    pub action: String,
    pub success: Option<bool>,
    pub error: Option<String>,
}

impl SubsystemOutcome {
    pub fn not_attempted() -> Self {
        Self {
            action: "none".to_string(),
            success: None,
            error: None,
        }
    }

    /// Dry run: the action that would have been written, with no attempt.
    pub fn planned(action: &str) -> Self {
        Self {
            action: action.to_string(),
            success: None,
            error: None,
        }
    }

    pub fn succeeded(action: &str) -> Self {
        Self {
            action: action.to_string(),
            success: Some(true),
            error: None,
        }
    }

    pub fn failed(action: &str, error: String) -> Self {
        Self {
            action: action.to_string(),
            success: Some(false),
            error: Some(error),
        }
    }
}

/// Per-subsystem write outcomes for one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnSummary {
    pub quest: SubsystemOutcome,
    pub combat: SubsystemOutcome,
    pub poi: SubsystemOutcome,
    pub narrative_persisted: bool,
    pub narrative_error: Option<String>,
    pub dry_run: bool,
}

impl TurnSummary {
    pub fn empty(dry_run: bool) -> Self {
        Self {
            quest: SubsystemOutcome::not_attempted(),
            combat: SubsystemOutcome::not_attempted(),
            poi: SubsystemOutcome::not_attempted(),
            narrative_persisted: false,
            narrative_error: None,
            dry_run,
        }
    }

    /// Whether any attempted write failed.
    pub fn any_write_failed(&self) -> bool {
        let failed = |outcome: &SubsystemOutcome| outcome.success == Some(false);
        failed(&self.quest)
            || failed(&self.combat)
            || failed(&self.poi)
            || self.narrative_error.is_some()
    }
}

/// A completed turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub turn_id: TurnId,
    pub trace_id: TraceId,
    pub narrative: String,
    pub intents: Option<Intents>,
    pub summary: TurnSummary,
}

/// A hard-stopped turn, machine-readable for the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct TurnFailure {
    pub kind: &'static str,
    pub trace_id: TraceId,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<f64>,
}

impl TurnFailure {
    pub fn from_error(trace_id: TraceId, error: &TurnError) -> Self {
        Self {
            kind: error.kind(),
            trace_id,
            message: error.to_string(),
            retry_after_seconds: error.retry_after_seconds(),
        }
    }

    pub fn internal(trace_id: TraceId, message: impl Into<String>) -> Self {
        Self {
            kind: "internal",
            trace_id,
            message: message.into(),
            retry_after_seconds: None,
        }
    }
}

impl std::fmt::Display for TurnFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.trace_id, self.message)
    }
}

impl std::error::Error for TurnFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tri_valued_success() {
        assert_eq!(SubsystemOutcome::not_attempted().success, None);
        assert_eq!(SubsystemOutcome::succeeded("offered").success, Some(true));
        let failed = SubsystemOutcome::failed("created", "500".into());
        assert_eq!(failed.success, Some(false));
        assert_eq!(failed.error.as_deref(), Some("500"));
    }

    #[test]
    fn test_any_write_failed() {
        let mut summary = TurnSummary::empty(false);
        assert!(!summary.any_write_failed());
        summary.poi = SubsystemOutcome::failed("created", "boom".into());
        assert!(summary.any_write_failed());

        let mut summary = TurnSummary::empty(false);
        summary.narrative_error = Some("timeout".into());
        assert!(summary.any_write_failed());
    }

    #[test]
    fn test_failure_from_error_carries_kind_and_retry() {
        let failure = TurnFailure::from_error(
            TraceId::from_value("t-1"),
            &TurnError::RateLimited {
                retry_after_seconds: 0.5,
            },
        );
        assert_eq!(failure.kind, "rate_limited");
        assert_eq!(failure.retry_after_seconds, Some(0.5));

        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "rate_limited");
        assert_eq!(json["trace_id"], "t-1");
    }
}
