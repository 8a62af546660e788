//! Bounded in-memory store of recent turn records.
//!
//! A keyed map indexed by turn id, an insertion-order queue for LRU
//! eviction, and a per-character ring of recent turn ids for the
//! "recent N" read path. Records are redacted on insert: narratives are
//! truncated and only typed fields are retained. All locked sections are
//! short, local work; no lock is held across I/O.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::AuditConfig;
use crate::policy::PolicyDecisions;
use crate::turn::summary::TurnSummary;
use crate::types::{CharacterId, TraceId, TurnId};
use crate::util::truncate_chars;

/// Narrative text kept per record.
const MAX_RECORD_NARRATIVE_CHARS: usize = 500;

/// Recent-turn ids retained per character.
const CHARACTER_RING_CAPACITY: usize = 128;

/// How the turn ended, from the audit record's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnDisposition {
    /// Narrative produced, every attempted write succeeded.
    Success,
    /// Narrative produced, but a write failed or the parse fell back.
    Partial,
    /// The turn aborted before writes.
    Error,
}

/// One turn's audit record.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub turn_id: TurnId,
    pub character_id: CharacterId,
    pub trace_id: TraceId,
    pub disposition: TurnDisposition,
    /// Policy decisions as computed, or `None` when the turn aborted first.
    pub decisions: Option<PolicyDecisions>,
    pub summary: Option<TurnSummary>,
    /// Truncated narrative text.
    pub narrative: String,
    /// Phase label to elapsed milliseconds, in execution order.
    pub phase_latencies_ms: Vec<(String, u64)>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

struct StoreInner {
    records: HashMap<TurnId, Arc<TurnRecord>>,
    /// Insertion order with monotonic insert times for TTL checks.
    order: VecDeque<(TurnId, Instant)>,
    by_character: HashMap<CharacterId, VecDeque<TurnId>>,
}

/// Bounded LRU + TTL store of [`TurnRecord`]s.
pub struct TurnAuditStore {
    inner: RwLock<StoreInner>,
    max_entries: usize,
    ttl: Duration,
}

impl TurnAuditStore {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                records: HashMap::new(),
                order: VecDeque::new(),
                by_character: HashMap::new(),
            }),
            max_entries: config.max_entries.max(1),
            ttl: Duration::from_secs(config.ttl_seconds),
        }
    }

    /// Insert a record, evicting expired entries first and then the oldest
    /// insertions if still over capacity.
    pub fn insert(&self, mut record: TurnRecord) {
        record.narrative = truncate_chars(&record.narrative, MAX_RECORD_NARRATIVE_CHARS);

        let mut inner = self.inner.write();
        let now = Instant::now();

        while let Some((id, inserted)) = inner.order.front().copied() {
            if now.duration_since(inserted) >= self.ttl {
                inner.order.pop_front();
                Self::remove_record(&mut inner, &id);
            } else {
                break;
            }
        }

        while inner.records.len() >= self.max_entries {
            match inner.order.pop_front() {
                Some((id, _)) => Self::remove_record(&mut inner, &id),
                None => break,
            }
        }

        let turn_id = record.turn_id;
        let character_id = record.character_id.clone();
        inner.records.insert(turn_id, Arc::new(record));
        inner.order.push_back((turn_id, now));

        let ring = inner.by_character.entry(character_id).or_default();
        ring.push_back(turn_id);
        while ring.len() > CHARACTER_RING_CAPACITY {
            ring.pop_front();
        }
    }

    fn remove_record(inner: &mut StoreInner, id: &TurnId) {
        if let Some(record) = inner.records.remove(id) {
            if let Some(ring) = inner.by_character.get_mut(&record.character_id) {
                ring.retain(|rid| rid != id);
                if ring.is_empty() {
                    inner.by_character.remove(&record.character_id);
                }
            }
        }
    }

    /// Fetch one record by turn id.
    pub fn get(&self, turn_id: &TurnId) -> Option<Arc<TurnRecord>> {
        self.inner.read().records.get(turn_id).cloned()
    }

    /// The most recent `limit` records for a character, newest first.
    pub fn recent_for_character(
        &self,
        character_id: &CharacterId,
        limit: usize,
    ) -> Vec<Arc<TurnRecord>> {
        let inner = self.inner.read();
        let Some(ring) = inner.by_character.get(character_id) else {
            return Vec::new();
        };
        ring.iter()
            .rev()
            .filter_map(|id| inner.records.get(id).cloned())
            .take(limit)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max_entries: usize, ttl_seconds: u64) -> TurnAuditStore {
        TurnAuditStore::new(&AuditConfig {
            max_entries,
            ttl_seconds,
        })
    }

    fn record(character: &str) -> TurnRecord {
        TurnRecord {
            turn_id: TurnId::new(),
            character_id: CharacterId::new(character),
            trace_id: TraceId::new(),
            disposition: TurnDisposition::Success,
            decisions: None,
            summary: None,
            narrative: "You proceed.".into(),
            phase_latencies_ms: vec![("fetch_context".into(), 12)],
            error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = store(10, 3600);
        let rec = record("c1");
        let id = rec.turn_id;
        store.insert(rec);
        let fetched = store.get(&id).unwrap();
        assert_eq!(fetched.character_id, CharacterId::new("c1"));
        assert!(store.get(&TurnId::new()).is_none());
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let store = store(3, 3600);
        let mut ids = Vec::new();
        for _ in 0..5 {
            let rec = record("c1");
            ids.push(rec.turn_id);
            store.insert(rec);
        }
        assert_eq!(store.len(), 3);
        assert!(store.get(&ids[0]).is_none());
        assert!(store.get(&ids[1]).is_none());
        assert!(store.get(&ids[4]).is_some());
    }

    #[test]
    fn test_ttl_evicts_expired_on_insert() {
        let store = store(10, 0);
        let first = record("c1");
        let first_id = first.turn_id;
        store.insert(first);
        // TTL of zero: the next insert sweeps the first record out.
        let second = record("c1");
        let second_id = second.turn_id;
        store.insert(second);
        assert!(store.get(&first_id).is_none());
        assert!(store.get(&second_id).is_some());
    }

    #[test]
    fn test_recent_for_character_newest_first() {
        let store = store(10, 3600);
        let mut ids = Vec::new();
        for _ in 0..4 {
            let rec = record("c1");
            ids.push(rec.turn_id);
            store.insert(rec);
        }
        store.insert(record("c2"));

        let recent = store.recent_for_character(&CharacterId::new("c1"), 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].turn_id, ids[3]);
        assert_eq!(recent[1].turn_id, ids[2]);
    }

    #[test]
    fn test_recent_for_unknown_character_is_empty() {
        let store = store(10, 3600);
        assert!(store
            .recent_for_character(&CharacterId::new("nobody"), 5)
            .is_empty());
    }

    #[test]
    fn test_narrative_truncated_on_insert() {
        let store = store(10, 3600);
        let mut rec = record("c1");
        rec.narrative = "n".repeat(2_000);
        let id = rec.turn_id;
        store.insert(rec);
        assert_eq!(
            store.get(&id).unwrap().narrative.chars().count(),
            MAX_RECORD_NARRATIVE_CHARS
        );
    }

    #[test]
    fn test_eviction_cleans_character_ring() {
        let store = store(1, 3600);
        let first = record("c1");
        let second = record("c2");
        let second_id = second.turn_id;
        store.insert(first);
        store.insert(second);

        assert!(store
            .recent_for_character(&CharacterId::new("c1"), 5)
            .is_empty());
        let recent = store.recent_for_character(&CharacterId::new("c2"), 5);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].turn_id, second_id);
    }
}
