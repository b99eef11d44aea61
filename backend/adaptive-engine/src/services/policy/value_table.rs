use crate::services::features::StateKey;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ActionValue {
    pub value: f64,
    pub visits: u64,
}

/// Flat, serializable form of one state-action estimate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueEntry {
    pub state: StateKey,
    pub activity_id: String,
    pub value: f64,
    pub visits: u64,
}

/// State-action value estimates keyed by abstracted state.
///
/// Writes to one state take that state's shard lock, so every mutating
/// update to a given key is serialized. Reads of other states are not
/// blocked and may observe a slightly stale value.
#[derive(Debug, Default)]
pub struct ValueTable {
    values: DashMap<StateKey, HashMap<String, ActionValue>>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, state: &StateKey, activity_id: &str) -> Option<ActionValue> {
        self.values
            .get(state)
            .and_then(|actions| actions.get(activity_id).copied())
    }

    /// Overwrite a value, keeping its visit count
    pub fn set(&self, state: StateKey, activity_id: &str, value: f64) {
        let mut actions = self.values.entry(state).or_default();
        actions
            .entry(activity_id.to_string())
            .and_modify(|slot| slot.value = value)
            .or_insert(ActionValue { value, visits: 0 });
    }

    /// Best stored value in a state; None if nothing was learned there
    pub fn max_value(&self, state: &StateKey) -> Option<f64> {
        self.values.get(state).and_then(|actions| {
            actions
                .values()
                .map(|slot| slot.value)
                .fold(None, |best: Option<f64>, v| Some(best.map_or(v, |b| b.max(v))))
        })
    }

    /// One TD step toward `target` under the state's write lock.
    ///
    /// `prior` seeds a pair seen for the first time. With `decay > 0` the
    /// other actions of the state shrink by that factor. Returns the
    /// `(old, new)` value of the updated pair.
    pub fn td_update(
        &self,
        state: StateKey,
        activity_id: &str,
        prior: f64,
        target: f64,
        learning_rate: f64,
        decay: f64,
    ) -> (f64, f64) {
        let mut actions = self.values.entry(state).or_default();

        if decay > 0.0 {
            for (id, slot) in actions.iter_mut() {
                if id != activity_id {
                    slot.value *= 1.0 - decay;
                }
            }
        }

        let slot = actions
            .entry(activity_id.to_string())
            .or_insert(ActionValue {
                value: prior,
                visits: 0,
            });
        let old = slot.value;
        slot.value = old + learning_rate * (target - old);
        slot.visits += 1;
        (old, slot.value)
    }

    /// Number of stored state-action pairs
    pub fn len(&self) -> usize {
        self.values.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.values.clear();
    }

    /// All estimates, ordered by state then activity id
    pub fn entries(&self) -> Vec<ValueEntry> {
        let mut entries: Vec<ValueEntry> = self
            .values
            .iter()
            .flat_map(|entry| {
                let state = *entry.key();
                entry
                    .value()
                    .iter()
                    .map(|(id, slot)| ValueEntry {
                        state,
                        activity_id: id.clone(),
                        value: slot.value,
                        visits: slot.visits,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_by(|a, b| {
            a.state
                .cmp(&b.state)
                .then_with(|| a.activity_id.cmp(&b.activity_id))
        });
        entries
    }

    pub fn load(&self, entries: Vec<ValueEntry>) {
        for entry in entries {
            self.values.entry(entry.state).or_default().insert(
                entry.activity_id,
                ActionValue {
                    value: entry.value,
                    visits: entry.visits,
                },
            );
        }
    }
}
