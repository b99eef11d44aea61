use crate::error::{EngineError, Result};
use crate::models::{Activity, Difficulty};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Progression gate: a learner is offered at most one level above the
/// highest difficulty they have mastered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MasteryConfig {
    /// Mean reward at a difficulty needed to count it as mastered
    pub threshold: f64,
    /// Attempts at a difficulty before mastery can be declared
    pub min_attempts: u32,
}

impl Default for MasteryConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_attempts: 3,
        }
    }
}

impl MasteryConfig {
    pub fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.threshold) {
            return Err(EngineError::Configuration(format!(
                "mastery threshold must be in [-1, 1], got {}",
                self.threshold
            )));
        }
        if self.min_attempts == 0 {
            return Err(EngineError::Configuration(
                "mastery min_attempts must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasteryRecord {
    pub difficulty: Difficulty,
    pub attempts: u32,
    pub mean_reward: f64,
    /// Sticky once set
    pub mastered: bool,
}

#[derive(Debug, Clone)]
pub struct MasteryTracker {
    config: MasteryConfig,
    records: BTreeMap<Difficulty, MasteryRecord>,
}

impl MasteryTracker {
    pub fn new(config: MasteryConfig) -> Self {
        Self {
            config,
            records: BTreeMap::new(),
        }
    }

    /// Count one rewarded attempt. Returns the difficulty if this attempt
    /// is the one that mastered it.
    pub fn record(&mut self, difficulty: Difficulty, reward: f64) -> Option<Difficulty> {
        let record = self.records.entry(difficulty).or_insert(MasteryRecord {
            difficulty,
            attempts: 0,
            mean_reward: 0.0,
            mastered: false,
        });
        record.attempts += 1;
        record.mean_reward += (reward - record.mean_reward) / record.attempts as f64;

        if !record.mastered
            && record.attempts >= self.config.min_attempts
            && record.mean_reward >= self.config.threshold
        {
            record.mastered = true;
            return Some(difficulty);
        }
        None
    }

    /// Highest mastered difficulty
    pub fn frontier(&self) -> Option<Difficulty> {
        self.records
            .values()
            .rev()
            .find(|r| r.mastered)
            .map(|r| r.difficulty)
    }

    /// Candidates at or below the gate level. The gate is one level above
    /// the frontier, but never below the easiest candidate, so the result
    /// is non-empty whenever `candidates` is.
    pub fn gate<'a>(&self, candidates: &'a [Activity]) -> Vec<&'a Activity> {
        let easiest = match candidates.iter().map(|a| a.difficulty.level()).min() {
            Some(level) => level,
            None => return Vec::new(),
        };
        let ceiling = self
            .frontier()
            .map(|d| d.level() + 1)
            .unwrap_or(0)
            .max(easiest);
        candidates
            .iter()
            .filter(|a| a.difficulty.level() <= ceiling)
            .collect()
    }

    pub fn records(&self) -> Vec<MasteryRecord> {
        self.records.values().cloned().collect()
    }

    pub fn load(&mut self, records: Vec<MasteryRecord>) {
        self.records = records.into_iter().map(|r| (r.difficulty, r)).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> Vec<Activity> {
        Difficulty::ALL
            .iter()
            .map(|d| Activity::new(format!("lesson-{}", d.level()), *d))
            .collect()
    }

    fn levels(gated: &[&Activity]) -> Vec<u8> {
        gated.iter().map(|a| a.difficulty.level()).collect()
    }

    #[test]
    fn test_nothing_mastered_offers_easiest_only() {
        let tracker = MasteryTracker::new(MasteryConfig::default());
        let ladder = ladder();
        assert_eq!(levels(&tracker.gate(&ladder)), vec![1]);
        assert!(tracker.gate(&[]).is_empty());
    }

    #[test]
    fn test_mastery_needs_attempts_and_reward() {
        let mut tracker = MasteryTracker::new(MasteryConfig::default());
        assert_eq!(tracker.record(Difficulty::VeryEasy, 0.9), None);
        assert_eq!(tracker.record(Difficulty::VeryEasy, 0.9), None);
        assert_eq!(
            tracker.record(Difficulty::VeryEasy, 0.9),
            Some(Difficulty::VeryEasy)
        );
        // Reported once only
        assert_eq!(tracker.record(Difficulty::VeryEasy, 0.9), None);

        for _ in 0..5 {
            assert_eq!(tracker.record(Difficulty::Easy, 0.2), None);
        }
        assert_eq!(tracker.frontier(), Some(Difficulty::VeryEasy));
    }

    #[test]
    fn test_gate_opens_one_level_past_frontier() {
        let mut tracker = MasteryTracker::new(MasteryConfig {
            threshold: 0.5,
            min_attempts: 1,
        });
        tracker.record(Difficulty::Easy, 0.8);
        let ladder = ladder();
        assert_eq!(levels(&tracker.gate(&ladder)), vec![1, 2, 3]);

        // Easiest remaining candidate is above the ceiling
        let hard_only = vec![Activity::new("h", Difficulty::Expert)];
        assert_eq!(levels(&tracker.gate(&hard_only)), vec![6]);
    }

    #[test]
    fn test_records_round_trip() {
        let mut tracker = MasteryTracker::new(MasteryConfig::default());
        for _ in 0..3 {
            tracker.record(Difficulty::Medium, 0.7);
        }
        let mut restored = MasteryTracker::new(MasteryConfig::default());
        restored.load(tracker.records());
        assert_eq!(restored.frontier(), Some(Difficulty::Medium));
    }

    #[test]
    fn test_invalid_config() {
        assert!(MasteryConfig {
            threshold: 2.0,
            min_attempts: 3
        }
        .validate()
        .is_err());
        assert!(MasteryConfig {
            threshold: 0.5,
            min_attempts: 0
        }
        .validate()
        .is_err());
    }
}
