use super::ValueTable;
use crate::services::simulation::TraitProfile;
use dashmap::DashMap;
use std::sync::Arc;

/// Weight of trait likeness in the combined peer similarity
pub const TRAIT_WEIGHT: f64 = 0.6;
/// Weight of value-table likeness in the combined peer similarity
pub const TABLE_WEIGHT: f64 = 0.4;

/// Cosine similarity over the state-action pairs both tables hold.
/// Zero when they share none or either side is all zeros.
pub fn table_similarity(a: &ValueTable, b: &ValueTable) -> f64 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for entry in a.entries() {
        if let Some(other) = b.get(&entry.state, &entry.activity_id) {
            dot += entry.value * other.value;
            norm_a += entry.value * entry.value;
            norm_b += other.value * other.value;
        }
    }
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Debug, Clone)]
pub struct Peer {
    pub traits: Option<TraitProfile>,
    pub table: Arc<ValueTable>,
}

/// The peer a learner borrows estimates from
#[derive(Debug, Clone)]
pub struct Mentor {
    pub learner_id: String,
    pub similarity: f64,
    pub table: Arc<ValueTable>,
}

/// Every learner's private table, visible to the others for
/// collaborative estimates
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<String, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, learner_id: &str, traits: Option<TraitProfile>, table: Arc<ValueTable>) {
        self.peers.insert(learner_id.to_string(), Peer { traits, table });
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// `0.6 * trait similarity + 0.4 * table similarity`; traits count as
    /// zero when either side has none
    pub fn similarity(left: &Peer, right: &Peer) -> f64 {
        let traits = match (&left.traits, &right.traits) {
            (Some(a), Some(b)) => a.similarity(b),
            _ => 0.0,
        };
        TRAIT_WEIGHT * traits + TABLE_WEIGHT * table_similarity(&left.table, &right.table)
    }

    /// Most similar other learner that has learned anything.
    /// Ties go to the smaller learner id.
    pub fn most_similar(&self, learner_id: &str) -> Option<Mentor> {
        let me = self.peers.get(learner_id).map(|p| p.value().clone())?;

        // Clone out first so no shard lock is held while reading tables
        let mut others: Vec<(String, Peer)> = self
            .peers
            .iter()
            .filter(|entry| entry.key() != learner_id && !entry.value().table.is_empty())
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        others.sort_by(|a, b| a.0.cmp(&b.0));

        let mut best: Option<Mentor> = None;
        for (id, peer) in others {
            let similarity = Self::similarity(&me, &peer);
            if best.as_ref().map_or(true, |m| similarity > m.similarity) {
                best = Some(Mentor {
                    learner_id: id,
                    similarity,
                    table: peer.table,
                });
            }
        }
        best
    }
}
