//! Per-character random sources for policy rolls.
//!
//! With a configured seed, each character gets a `StdRng` derived from
//! `sha256(seed || character_id)`, held in a keyed map so consecutive turns
//! for the same character continue one deterministic stream. Without a seed,
//! every turn draws from fresh OS entropy and nothing is retained.
//!
//! The per-character rate limiter already rejects concurrent turns for one
//! character, so a turn holds the only live handle to that character's
//! stream while it runs.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::types::CharacterId;

/// Hands out per-character roll sources.
pub struct RngPool {
    seed: Option<u64>,
    seeded: DashMap<CharacterId, Arc<Mutex<StdRng>>>,
}

impl RngPool {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            seed,
            seeded: DashMap::new(),
        }
    }

    /// The roll source for one turn of `character_id`.
    pub fn for_character(&self, character_id: &CharacterId) -> CharacterRng {
        match self.seed {
            Some(seed) => {
                let entry = self
                    .seeded
                    .entry(character_id.clone())
                    .or_insert_with(|| {
                        Arc::new(Mutex::new(StdRng::from_seed(mix_seed(seed, character_id))))
                    });
                CharacterRng(Arc::clone(entry.value()))
            }
            None => CharacterRng(Arc::new(Mutex::new(StdRng::from_entropy()))),
        }
    }
}

/// Derive a 32-byte sub-seed from the global seed and the character id.
fn mix_seed(seed: u64, character_id: &CharacterId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(character_id.as_str().as_bytes());
    hasher.finalize().into()
}

/// Handle to one character's random stream for the duration of a turn.
#[derive(Clone)]
pub struct CharacterRng(Arc<Mutex<StdRng>>);

impl CharacterRng {
    /// Uniform draw in `[0, 1)`.
    pub fn roll(&self) -> f64 {
        self.0.lock().gen::<f64>()
    }

    /// Uniform index draw in `[0, len)`. `len` must be non-zero.
    pub fn pick(&self, len: usize) -> usize {
        self.0.lock().gen_range(0..len)
    }
}
