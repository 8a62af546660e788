//! Policy engine: deterministic eligibility checks and probability rolls
//! gating the optional subsystems each turn.

pub mod engine;
pub mod rng;

pub use engine::{decide, PolicyDecisions, SparkDecision, SubsystemRoll};
pub use rng::{CharacterRng, RngPool};
