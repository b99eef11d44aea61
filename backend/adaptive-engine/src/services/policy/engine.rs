use super::{
    ConvergenceMonitor, EngineMode, MasteryRecord, MasteryTracker, Mentor, ModeTransition,
    PeerRegistry, PolicyConfig, ValueEntry, ValueTable,
};
use crate::error::{EngineError, Result};
use crate::models::{Activity, Difficulty};
use crate::services::features::{FeatureVector, StateKey};
use crate::services::simulation::TraitProfile;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of one learning update
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LearnStep {
    pub state: StateKey,
    pub old_value: f64,
    pub new_value: f64,
    pub td_error: f64,
    pub mode: EngineMode,
    /// Difficulty this step mastered, when a mastery gate is configured
    pub mastered: Option<Difficulty>,
}

/// Serializable policy state for one learner's engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicySnapshot {
    pub learner_id: String,
    pub values: Vec<ValueEntry>,
    pub monitor: ConvergenceMonitor,
    pub exploration_step: u32,
    #[serde(default)]
    pub mastery: Vec<MasteryRecord>,
}

/// Decision engine for one learner.
///
/// Mode, exploration schedule position and RNG always belong to the learner;
/// the value table is either private or shared (see `PolicyScope`).
pub struct PolicyEngine {
    learner_id: String,
    config: PolicyConfig,
    table: Arc<ValueTable>,
    /// The table belongs to this learner alone, even if peers can read it
    owns_table: bool,
    peers: Option<Arc<PeerRegistry>>,
    mastery: Option<MasteryTracker>,
    monitor: ConvergenceMonitor,
    rng: StdRng,
    exploration_step: u32,
}

/// Derives a per-learner stream from the configured seed
fn learner_seed(seed: u64, learner_id: &str) -> u64 {
    learner_id
        .bytes()
        .fold(seed, |acc, b| acc.rotate_left(5) ^ b as u64)
}

impl PolicyEngine {
    /// Engine with a private value table
    pub fn new(learner_id: impl Into<String>, config: PolicyConfig) -> Result<Self> {
        Self::build(learner_id.into(), config, Arc::new(ValueTable::new()), true)
    }

    /// Engine backed by a (possibly shared) value table
    pub fn with_table(
        learner_id: impl Into<String>,
        config: PolicyConfig,
        table: Arc<ValueTable>,
    ) -> Result<Self> {
        Self::build(learner_id.into(), config, table, false)
    }

    /// Engine with a private table published to `peers`. Pairs this learner
    /// has not tried borrow the most similar peer's estimate.
    pub fn collaborative(
        learner_id: impl Into<String>,
        config: PolicyConfig,
        peers: Arc<PeerRegistry>,
        traits: Option<TraitProfile>,
    ) -> Result<Self> {
        let mut engine = Self::new(learner_id, config)?;
        peers.register(&engine.learner_id, traits, Arc::clone(&engine.table));
        engine.peers = Some(peers);
        Ok(engine)
    }

    fn build(
        learner_id: String,
        config: PolicyConfig,
        table: Arc<ValueTable>,
        owns_table: bool,
    ) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(learner_seed(seed, &learner_id)),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            monitor: ConvergenceMonitor::new(config.convergence.clone()),
            mastery: config.mastery.map(MasteryTracker::new),
            learner_id,
            config,
            table,
            owns_table,
            peers: None,
            rng,
            exploration_step: 0,
        })
    }

    pub fn learner_id(&self) -> &str {
        &self.learner_id
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<ValueTable> {
        &self.table
    }

    pub fn mode(&self) -> EngineMode {
        self.monitor.mode()
    }

    /// Exploration rate in effect for the next `select`
    pub fn epsilon(&self) -> f64 {
        match self.mode() {
            EngineMode::Converged => self.config.exploration.floor(),
            EngineMode::Exploring => self.config.exploration.epsilon_at(self.exploration_step),
        }
    }

    /// Difficulty-matching prior for a pair with no stored estimate
    pub fn prior(&self, activity: &Activity, features: &FeatureVector) -> f64 {
        let gap = (activity.difficulty.normalized() - features.comfort).abs();
        self.config.prior_weight * (1.0 - gap)
    }

    /// Highest mastered difficulty; None without a mastery gate
    pub fn mastery_frontier(&self) -> Option<Difficulty> {
        self.mastery.as_ref().and_then(|m| m.frontier())
    }

    /// Peer currently lent estimates from, in the collaborative scope
    pub fn mentor(&self) -> Option<Mentor> {
        self.peers
            .as_ref()
            .and_then(|peers| peers.most_similar(&self.learner_id))
    }

    /// Current estimate for `activity` in the state described by `features`
    pub fn estimate(&self, features: &FeatureVector, activity: &Activity) -> f64 {
        self.estimate_with(features, activity, self.mentor().as_ref())
    }

    /// Own value, else the mentor's, else the prior
    fn estimate_with(
        &self,
        features: &FeatureVector,
        activity: &Activity,
        mentor: Option<&Mentor>,
    ) -> f64 {
        let state = StateKey::from_features(features);
        self.table
            .get(&state, &activity.id)
            .or_else(|| mentor.and_then(|m| m.table.get(&state, &activity.id)))
            .map(|slot| slot.value)
            .unwrap_or_else(|| self.prior(activity, features))
    }

    /// Candidates the mastery gate lets through
    fn gate<'a>(&self, candidates: &'a [Activity]) -> Vec<&'a Activity> {
        match &self.mastery {
            Some(mastery) => mastery.gate(candidates),
            None => candidates.iter().collect(),
        }
    }

    /// Pick the next activity. Never returns an id outside `candidates`.
    pub fn select(&mut self, features: &FeatureVector, candidates: &[Activity]) -> Result<String> {
        if candidates.is_empty() {
            return Err(EngineError::EmptyCandidateSet(self.learner_id.clone()));
        }
        if candidates.len() == 1 {
            return Ok(candidates[0].id.clone());
        }

        let mut ordered = self.gate(candidates);
        let epsilon = self.epsilon();
        if epsilon > 0.0 && self.rng.gen::<f64>() < epsilon {
            let choice = ordered[self.rng.gen_range(0..ordered.len())];
            debug!(
                learner_id = %self.learner_id,
                activity_id = %choice.id,
                epsilon = epsilon,
                "Exploratory selection"
            );
            return Ok(choice.id.clone());
        }

        let mentor = self.mentor();
        if let Some(mentor) = &mentor {
            debug!(
                learner_id = %self.learner_id,
                mentor = %mentor.learner_id,
                similarity = mentor.similarity,
                "Borrowing peer estimates"
            );
        }

        // Lower difficulty first so that ties resolve toward it
        ordered.sort_by(|a, b| a.difficulty.cmp(&b.difficulty).then_with(|| a.id.cmp(&b.id)));

        let mut best = ordered[0];
        let mut best_value = self.estimate_with(features, best, mentor.as_ref());
        for candidate in ordered.into_iter().skip(1) {
            let value = self.estimate_with(features, candidate, mentor.as_ref());
            if value > best_value + self.config.tie_tolerance {
                best = candidate;
                best_value = value;
            }
        }

        debug!(
            learner_id = %self.learner_id,
            activity_id = %best.id,
            difficulty = %best.difficulty,
            value = best_value,
            "Greedy selection"
        );
        Ok(best.id.clone())
    }

    /// Best estimate reachable from `next_features`: stored values of the
    /// state plus the estimate (prior-backed when unvisited) of every
    /// candidate the gate allows next. Zero when there is neither.
    fn max_next(&self, next_features: &FeatureVector, next_candidates: &[Activity]) -> f64 {
        let next_state = StateKey::from_features(next_features);
        let mentor = self.mentor();
        self.gate(next_candidates)
            .into_iter()
            .map(|activity| self.estimate_with(next_features, activity, mentor.as_ref()))
            .chain(self.table.max_value(&next_state))
            .fold(None, |best: Option<f64>, v| Some(best.map_or(v, |b| b.max(v))))
            .unwrap_or(0.0)
    }

    /// TD update for the previous selection
    pub fn learn(
        &mut self,
        features: &FeatureVector,
        chosen: &Activity,
        reward: f64,
        next_features: &FeatureVector,
        next_candidates: &[Activity],
    ) -> Result<LearnStep> {
        if !reward.is_finite() {
            return Err(EngineError::InvalidEvent(format!(
                "non-finite reward {}",
                reward
            )));
        }

        let mastered = self
            .mastery
            .as_mut()
            .and_then(|m| m.record(chosen.difficulty, reward));
        if let Some(difficulty) = mastered {
            info!(
                learner_id = %self.learner_id,
                difficulty = %difficulty,
                "Difficulty mastered"
            );
        }

        let state = StateKey::from_features(features);
        // Read before taking the write lock; the next state may equal state
        let max_next = self.max_next(next_features, next_candidates);
        let target = reward + self.config.discount * max_next;
        let prior = self.prior(chosen, features);

        let (old_value, new_value) = self.table.td_update(
            state,
            &chosen.id,
            prior,
            target,
            self.config.learning_rate,
            self.config.value_decay,
        );
        self.exploration_step = self.exploration_step.saturating_add(1);

        match self.monitor.record(new_value - old_value, reward) {
            Some(ModeTransition::Converged { baseline }) => {
                info!(
                    learner_id = %self.learner_id,
                    baseline = baseline,
                    "Policy converged"
                );
            }
            Some(ModeTransition::Drifted { baseline, recent }) => {
                // Restart the exploration schedule for the drifted learner
                self.exploration_step = 0;
                info!(
                    learner_id = %self.learner_id,
                    baseline = baseline,
                    recent = recent,
                    "Reward drift detected, exploring again"
                );
            }
            None => {}
        }

        debug!(
            learner_id = %self.learner_id,
            state = %state,
            activity_id = %chosen.id,
            reward = reward,
            old_value = old_value,
            new_value = new_value,
            "Value updated"
        );

        Ok(LearnStep {
            state,
            old_value,
            new_value,
            td_error: target - old_value,
            mode: self.mode(),
            mastered,
        })
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            learner_id: self.learner_id.clone(),
            values: self.table.entries(),
            monitor: self.monitor.clone(),
            exploration_step: self.exploration_step,
            mastery: self
                .mastery
                .as_ref()
                .map(|m| m.records())
                .unwrap_or_default(),
        }
    }

    /// Load persisted policy state. The engine is left untouched on error.
    pub fn restore(&mut self, snapshot: PolicySnapshot) -> Result<()> {
        if snapshot.learner_id != self.learner_id {
            return Err(EngineError::PolicyStateCorrupt(format!(
                "snapshot for learner {} loaded into engine of {}",
                snapshot.learner_id, self.learner_id
            )));
        }
        if let Some(bad) = snapshot.values.iter().find(|e| !e.value.is_finite()) {
            return Err(EngineError::PolicyStateCorrupt(format!(
                "non-finite value for {} in state {}",
                bad.activity_id, bad.state
            )));
        }
        let monitor = snapshot
            .monitor
            .with_config(self.config.convergence.clone());
        monitor
            .check()
            .map_err(EngineError::PolicyStateCorrupt)?;

        if self.owns_table {
            self.table.clear();
        }
        self.table.load(snapshot.values);
        if let Some(mastery) = self.mastery.as_mut() {
            mastery.load(snapshot.mastery);
        }
        self.monitor = monitor;
        self.exploration_step = snapshot.exploration_step;
        Ok(())
    }
}
