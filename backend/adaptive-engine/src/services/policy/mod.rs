// ============================================
// Policy / Decision Engine (決策引擎)
// ============================================
//
// Tabular Q-learning over abstracted learner states (StateKey) with
// epsilon-greedy exploration and a two-mode controller:
//
//   EXPLORING ──(value changes < ε over a full window)──▶ CONVERGED
//   CONVERGED ──(rolling reward mean drops by > drift)──▶ EXPLORING
//
// TD update:
//   Q(s,a) ← Q(s,a) + lr * (reward + discount * max_a' Q(s',a') - Q(s,a))
//
// Unseen state-action pairs start from a difficulty-matching prior:
//   prior_weight * (1 - |difficulty_rank - comfort|)
//
// Tie-break: among candidates within `tie_tolerance` of the best value the
// lowest difficulty wins, then the lexicographically smallest id.
//
// Optional mastery gate: only difficulties up to one level past the highest
// mastered one are offered. In the Collaborative scope, pairs a learner has
// not tried take the estimate of the most similar peer
// (0.6 * trait similarity + 0.4 * value-table cosine).

pub mod collaborative;
pub mod convergence;
pub mod engine;
pub mod mastery;
pub mod value_table;

pub use collaborative::{Mentor, Peer, PeerRegistry};
pub use convergence::{ConvergenceConfig, ConvergenceMonitor, EngineMode, ModeTransition};
pub use engine::{LearnStep, PolicyEngine, PolicySnapshot};
pub use mastery::{MasteryConfig, MasteryRecord, MasteryTracker};
pub use value_table::{ActionValue, ValueEntry, ValueTable};

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How epsilon evolves while the engine is EXPLORING
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExplorationSchedule {
    Constant { epsilon: f64 },
    /// Linear decay from `start` to `end` over `decay_steps` learning steps
    Decaying {
        start: f64,
        end: f64,
        decay_steps: u32,
    },
}

impl ExplorationSchedule {
    pub fn epsilon_at(&self, step: u32) -> f64 {
        match *self {
            ExplorationSchedule::Constant { epsilon } => epsilon,
            ExplorationSchedule::Decaying {
                start,
                end,
                decay_steps,
            } => {
                if decay_steps == 0 || step >= decay_steps {
                    end
                } else {
                    start + (end - start) * (step as f64 / decay_steps as f64)
                }
            }
        }
    }

    /// Epsilon used once the engine has converged
    pub fn floor(&self) -> f64 {
        match *self {
            ExplorationSchedule::Constant { epsilon } => epsilon,
            ExplorationSchedule::Decaying { end, .. } => end,
        }
    }

    fn validate(&self) -> Result<()> {
        let values = match *self {
            ExplorationSchedule::Constant { epsilon } => vec![epsilon],
            ExplorationSchedule::Decaying { start, end, .. } => vec![start, end],
        };
        if values.iter().all(|e| (0.0..=1.0).contains(e)) {
            Ok(())
        } else {
            Err(EngineError::Configuration(format!(
                "epsilon values must be in [0, 1], got {:?}",
                self
            )))
        }
    }
}

impl Default for ExplorationSchedule {
    fn default() -> Self {
        ExplorationSchedule::Decaying {
            start: 0.3,
            end: 0.05,
            decay_steps: 200,
        }
    }
}

/// Whether learners share one value table
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyScope {
    #[default]
    PerLearner,
    Shared,
    /// Private tables; untried pairs borrow from the most similar peer
    Collaborative,
}

impl FromStr for PolicyScope {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_learner" => Ok(PolicyScope::PerLearner),
            "shared" => Ok(PolicyScope::Shared),
            "collaborative" => Ok(PolicyScope::Collaborative),
            other => Err(EngineError::Configuration(format!(
                "unknown policy scope `{}`",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Valid range (0, 1]
    pub learning_rate: f64,
    /// Valid range [0, 1)
    pub discount: f64,
    pub exploration: ExplorationSchedule,
    /// Scale of the difficulty-matching prior for unseen pairs
    pub prior_weight: f64,
    /// Values closer than this are treated as equal
    pub tie_tolerance: f64,
    /// Per-step shrink factor for non-chosen actions in the visited state
    pub value_decay: f64,
    pub convergence: ConvergenceConfig,
    pub scope: PolicyScope,
    /// Progression gate; off when absent
    pub mastery: Option<MasteryConfig>,
    /// Seed for the exploration RNG; entropy when absent
    pub seed: Option<u64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount: 0.9,
            exploration: ExplorationSchedule::default(),
            prior_weight: 0.5,
            tie_tolerance: 1e-9,
            value_decay: 0.0,
            convergence: ConvergenceConfig::default(),
            scope: PolicyScope::PerLearner,
            mastery: None,
            seed: None,
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(EngineError::Configuration(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.discount) {
            return Err(EngineError::Configuration(format!(
                "discount must be in [0, 1), got {}",
                self.discount
            )));
        }
        self.exploration.validate()?;
        if !(0.0..1.0).contains(&self.value_decay) {
            return Err(EngineError::Configuration(format!(
                "value_decay must be in [0, 1), got {}",
                self.value_decay
            )));
        }
        if !self.prior_weight.is_finite() || self.prior_weight < 0.0 || self.tie_tolerance < 0.0 {
            return Err(EngineError::Configuration(
                "prior_weight and tie_tolerance must be non-negative".to_string(),
            ));
        }
        if let Some(mastery) = &self.mastery {
            mastery.validate()?;
        }
        self.convergence.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PolicyConfig::default().validate().is_ok());
    }

    #[test]
    fn test_learning_rate_and_discount_ranges() {
        for (lr, discount) in [(0.0, 0.9), (1.5, 0.9), (0.1, 1.0), (0.1, -0.1)] {
            let config = PolicyConfig {
                learning_rate: lr,
                discount,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "lr={} discount={}", lr, discount);
        }
        let edge = PolicyConfig {
            learning_rate: 1.0,
            discount: 0.0,
            ..Default::default()
        };
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_decaying_schedule() {
        let schedule = ExplorationSchedule::default();
        assert_eq!(schedule.epsilon_at(0), 0.3);
        assert!((schedule.epsilon_at(100) - 0.175).abs() < 1e-9);
        assert_eq!(schedule.epsilon_at(200), 0.05);
        assert_eq!(schedule.epsilon_at(10_000), 0.05);
        assert_eq!(schedule.floor(), 0.05);
    }

    #[test]
    fn test_constant_schedule() {
        let schedule = ExplorationSchedule::Constant { epsilon: 0.2 };
        assert_eq!(schedule.epsilon_at(0), 0.2);
        assert_eq!(schedule.epsilon_at(999), 0.2);
        let bad = PolicyConfig {
            exploration: ExplorationSchedule::Constant { epsilon: 1.2 },
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!("shared".parse::<PolicyScope>().unwrap(), PolicyScope::Shared);
        assert_eq!(
            "per-learner".parse::<PolicyScope>().unwrap(),
            PolicyScope::PerLearner
        );
        assert_eq!(
            "Collaborative".parse::<PolicyScope>().unwrap(),
            PolicyScope::Collaborative
        );
        assert!("global".parse::<PolicyScope>().is_err());
    }
}
