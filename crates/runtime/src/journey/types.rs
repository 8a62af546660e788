//! Domain types owned by the journey-log store.
//!
//! These mirror the store's wire format. The context snapshot is constructed
//! once per turn and discarded when the turn completes; nothing here is
//! cached across turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::CharacterId;

/// Character health. Transitions are monotonic toward `Dead` and never
/// reverse from it; the store enforces this, the runtime only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Wounded,
    Dead,
}

impl HealthStatus {
    /// Whether the character can still act on the world (quest/POI policy
    /// eligibility requires this).
    pub fn is_active(self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Wounded)
    }

    /// Position along the one-way Healthy → Wounded → Dead progression.
    pub fn severity(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Wounded => 1,
            HealthStatus::Dead => 2,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Wounded => write!(f, "wounded"),
            HealthStatus::Dead => write!(f, "dead"),
        }
    }
}

/// Where the character currently is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub display_name: String,
}

/// An active or offered quest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quest {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default)]
    pub requirements: Vec<String>,
}

/// One enemy in an encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enemy {
    pub name: String,
    pub hp: i32,
    pub max_hp: i32,
    #[serde(default)]
    pub weapon: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Combat encounter state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatState {
    /// 1-based combat turn counter.
    pub turn: u32,
    pub enemies: Vec<Enemy>,
}

/// One prior turn from the character's history, oldest-to-newest order in
/// the context snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub player_action: String,
    pub response: String,
}

/// Turns elapsed since each subsystem last wrote successfully. The store
/// advances these; they reset only on a successful subsystem write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyCounters {
    pub turns_since_last_quest: u32,
    pub turns_since_last_poi: u32,
}

/// A named, tagged point of interest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poi {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// POST payload for creating a point of interest. Deliberately excludes any
/// internal action/bookkeeping fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoiCreate {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// POST payload persisting one narrative exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeTurn {
    pub player_action: String,
    pub response: String,
}

/// Snapshot of character state fetched at the start of a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterContext {
    pub character_id: CharacterId,
    pub status: HealthStatus,
    pub location: Location,
    #[serde(default)]
    pub active_quest: Option<Quest>,
    #[serde(default)]
    pub combat: Option<CombatState>,
    /// Oldest to newest.
    #[serde(default)]
    pub recent_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub policy: PolicyCounters,
    /// Populated by the orchestrator from the random-POI endpoint, never by
    /// the context call itself.
    #[serde(default)]
    pub memory_sparks: Vec<Poi>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_activity() {
        assert!(HealthStatus::Healthy.is_active());
        assert!(HealthStatus::Wounded.is_active());
        assert!(!HealthStatus::Dead.is_active());
    }

    #[test]
    fn test_status_severity_is_monotonic() {
        assert!(HealthStatus::Healthy.severity() < HealthStatus::Wounded.severity());
        assert!(HealthStatus::Wounded.severity() < HealthStatus::Dead.severity());
    }

    #[test]
    fn test_context_deserializes_with_minimal_fields() {
        let raw = serde_json::json!({
            "character_id": "c-1",
            "status": "healthy",
            "location": {"id": "loc-1", "display_name": "The Rusty Flagon"}
        });
        let context: CharacterContext = serde_json::from_value(raw).unwrap();
        assert!(context.active_quest.is_none());
        assert!(context.combat.is_none());
        assert!(context.recent_history.is_empty());
        assert!(context.memory_sparks.is_empty());
        assert_eq!(context.policy.turns_since_last_quest, 0);
    }

    #[test]
    fn test_status_wire_format_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Wounded).unwrap(),
            "\"wounded\""
        );
        let status: HealthStatus = serde_json::from_str("\"dead\"").unwrap();
        assert_eq!(status, HealthStatus::Dead);
    }

    #[test]
    fn test_poi_create_payload_shape() {
        let poi = PoiCreate {
            name: "Old Mill".into(),
            description: "A crumbling mill by the river.".into(),
            tags: vec!["landmark".into()],
        };
        let value = serde_json::to_value(&poi).unwrap();
        let object = value.as_object().unwrap();
        // Exactly the wire fields, no internal action/bookkeeping keys.
        assert_eq!(object.len(), 3);
        for key in ["name", "description", "tags"] {
            assert!(object.contains_key(key), "missing {key}");
        }
    }
}
