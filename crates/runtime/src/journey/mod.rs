//! Journey-log store integration: domain types and the typed REST client.

pub mod client;
pub mod types;

pub use client::{JourneyLog, JourneyLogHttpClient, TRACE_HEADER};
pub use types::{
    CharacterContext, CombatState, Enemy, HealthStatus, HistoryEntry, Location, NarrativeTurn,
    Poi, PoiCreate, PolicyCounters, Quest,
};
