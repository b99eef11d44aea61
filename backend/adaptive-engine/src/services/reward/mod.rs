// ============================================
// Reward Model (獎勵模型)
// ============================================
//
// reward = correctness + latency shaping + progress - frustration
//
// Correctness:  +1/attempt when correct (later-attempt success earns less),
//               -(0.5 + 0.5 * (1 - 1/attempt)) when incorrect, -0.25 on skip
// Latency:      penalty once |z| exceeds the tolerance, where z compares the
//               response to the learner's OWN latency history (a slow but
//               steady learner is never penalized for being slow)
// Progress:     change in comfort since the decision, scaled
// Frustration:  flat penalty on abandon / multiple-retry signals
//
// The total is clipped to [clip_min, clip_max].

use crate::error::{EngineError, Result};
use crate::services::features::FeatureVector;
use crate::services::profile_store::LearnerProfile;
use event_schema::{Event, Outcome};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    pub correctness_weight: f64,
    pub latency_weight: f64,
    pub progress_weight: f64,
    pub frustration_penalty: f64,
    /// |z| below which latency is not shaped at all
    pub latency_tolerance_z: f64,
    /// Comfort change that earns the full progress weight
    pub progress_scale: f64,
    pub clip_min: f64,
    pub clip_max: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            correctness_weight: 0.6,
            latency_weight: 0.2,
            progress_weight: 0.2,
            frustration_penalty: 0.2,
            latency_tolerance_z: 1.5,
            progress_scale: 0.05,
            clip_min: -1.0,
            clip_max: 1.0,
        }
    }
}

impl RewardConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.clip_min.is_finite() && self.clip_max.is_finite() && self.clip_min < self.clip_max)
        {
            return Err(EngineError::Configuration(format!(
                "reward clip bounds must satisfy min < max, got [{}, {}]",
                self.clip_min, self.clip_max
            )));
        }
        let weights = [
            ("correctness_weight", self.correctness_weight),
            ("latency_weight", self.latency_weight),
            ("progress_weight", self.progress_weight),
            ("frustration_penalty", self.frustration_penalty),
        ];
        for (name, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(EngineError::Configuration(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, weight
                )));
            }
        }
        if self.latency_tolerance_z <= 0.0 || self.progress_scale <= 0.0 {
            return Err(EngineError::Configuration(
                "latency_tolerance_z and progress_scale must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Individual reward terms, before clipping
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RewardBreakdown {
    pub correctness: f64,
    pub latency: f64,
    pub progress: f64,
    pub frustration: f64,
    /// Clipped sum of the terms above
    pub total: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RewardModel {
    config: RewardConfig,
}

impl RewardModel {
    pub fn new(config: RewardConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    /// Scalar reward for the previous selection
    pub fn score(
        &self,
        prev_features: &FeatureVector,
        event: &Event,
        updated_profile: &LearnerProfile,
    ) -> Result<f64> {
        Ok(self.breakdown(prev_features, event, updated_profile)?.total)
    }

    pub fn breakdown(
        &self,
        prev_features: &FeatureVector,
        event: &Event,
        updated_profile: &LearnerProfile,
    ) -> Result<RewardBreakdown> {
        event.validate()?;
        if event.learner_id != updated_profile.learner_id {
            return Err(EngineError::InvalidEvent(format!(
                "event for learner {} scored against profile of {}",
                event.learner_id, updated_profile.learner_id
            )));
        }

        let cfg = &self.config;
        let attempt = event.attempt_index as f64;

        let correctness = cfg.correctness_weight
            * match event.outcome {
                Outcome::Correct => 1.0 / attempt,
                Outcome::Incorrect => -(0.5 + 0.5 * (1.0 - 1.0 / attempt)),
                Outcome::Skipped => -0.25,
            };

        // Both directions are penalized: too fast suggests guessing,
        // too slow suggests frustration
        let excess = updated_profile.last_latency_z.abs() - cfg.latency_tolerance_z;
        let latency = if excess > 0.0 {
            -cfg.latency_weight * excess.min(2.0) / 2.0
        } else {
            0.0
        };

        let comfort_change = updated_profile.comfort - prev_features.comfort;
        let progress =
            cfg.progress_weight * (comfort_change / cfg.progress_scale).clamp(-1.0, 1.0);

        let frustration = if event.tags.iter().any(|t| t.is_frustration()) {
            -cfg.frustration_penalty
        } else {
            0.0
        };

        let total =
            (correctness + latency + progress + frustration).clamp(cfg.clip_min, cfg.clip_max);

        Ok(RewardBreakdown {
            correctness,
            latency,
            progress,
            frustration,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionContext;
    use crate::services::profile_store::{ProfileConfig, ProfileStore};
    use event_schema::SignalTag;

    fn scored(events: &[Event]) -> Vec<f64> {
        let store = ProfileStore::new(ProfileConfig::default()).unwrap();
        let model = RewardModel::default();
        let mut rewards = Vec::new();
        for event in events {
            let before = store.get(&event.learner_id).unwrap();
            let prev = FeatureVector::cold_start(None, &SessionContext::default());
            let prev = FeatureVector {
                comfort: before.comfort,
                ..prev
            };
            let updated = store.update(&event.learner_id, event).unwrap();
            rewards.push(model.score(&prev, event, &updated).unwrap());
        }
        rewards
    }

    #[test]
    fn test_correct_beats_incorrect() {
        let correct = scored(&[Event::new("a", "x", Outcome::Correct, 5.0, 1)]);
        let incorrect = scored(&[Event::new("b", "x", Outcome::Incorrect, 5.0, 1)]);
        assert!(correct[0] > 0.0);
        assert!(incorrect[0] < 0.0);
    }

    #[test]
    fn test_later_attempts_earn_less() {
        let first = scored(&[Event::new("a", "x", Outcome::Correct, 5.0, 1)]);
        let third = scored(&[Event::new("b", "x", Outcome::Correct, 5.0, 3)]);
        assert!(first[0] > third[0]);
        assert!(third[0] > 0.0);
    }

    #[test]
    fn test_high_baseline_latency_is_not_penalized() {
        // Same answers, one learner ten times slower than the other
        let fast: Vec<Event> = (0..8)
            .map(|_| Event::new("fast", "x", Outcome::Correct, 4.0, 1))
            .collect();
        let slow: Vec<Event> = (0..8)
            .map(|_| Event::new("slow", "x", Outcome::Correct, 40.0, 1))
            .collect();
        let fast_rewards = scored(&fast);
        let slow_rewards = scored(&slow);
        for (f, s) in fast_rewards.iter().zip(slow_rewards.iter()) {
            assert!((f - s).abs() < 1e-9);
        }
    }

    #[test]
    fn test_outlier_latency_is_penalized() {
        let model = RewardModel::default();
        let prev = FeatureVector::cold_start(None, &SessionContext::default());
        let event = Event::new("a", "x", Outcome::Correct, 5.0, 1);

        let mut steady = LearnerProfile::new("a");
        steady.comfort = prev.comfort;
        let mut outlier = steady.clone();
        outlier.last_latency_z = 3.5;

        let base = model.breakdown(&prev, &event, &steady).unwrap();
        let shaped = model.breakdown(&prev, &event, &outlier).unwrap();
        assert_eq!(base.latency, 0.0);
        assert!((shaped.latency + 0.2).abs() < 1e-9);
        assert!(shaped.total < base.total);
    }

    #[test]
    fn test_frustration_signal_penalized() {
        let plain = scored(&[Event::new("a", "x", Outcome::Incorrect, 5.0, 2)]);
        let abandoned = scored(&[Event::new("b", "x", Outcome::Incorrect, 5.0, 2)
            .with_tags(vec![SignalTag::Abandoned])]);
        assert!(abandoned[0] < plain[0]);
    }

    #[test]
    fn test_reward_always_within_clip_bounds() {
        let model = RewardModel::new(RewardConfig {
            correctness_weight: 5.0,
            frustration_penalty: 5.0,
            ..Default::default()
        })
        .unwrap();
        let prev = FeatureVector::cold_start(None, &SessionContext::default());
        let outcomes = [Outcome::Correct, Outcome::Incorrect, Outcome::Skipped];
        for (i, outcome) in outcomes.iter().enumerate() {
            for attempt in 1..6 {
                for z in [-10.0, -1.0, 0.0, 2.0, 10.0] {
                    let mut profile = LearnerProfile::new("a");
                    profile.last_latency_z = z;
                    profile.comfort = (i as f64) / 2.0;
                    let event = Event::new("a", "x", *outcome, 3.0, attempt)
                        .with_tags(vec![SignalTag::MultipleRetries]);
                    let reward = model.score(&prev, &event, &profile).unwrap();
                    assert!((-1.0..=1.0).contains(&reward), "reward {}", reward);
                }
            }
        }
    }

    #[test]
    fn test_malformed_event_rejected() {
        let model = RewardModel::default();
        let prev = FeatureVector::cold_start(None, &SessionContext::default());
        let profile = LearnerProfile::new("a");
        let bad = Event::new("a", "x", Outcome::Correct, -2.0, 1);
        assert!(matches!(
            model.score(&prev, &bad, &profile),
            Err(EngineError::InvalidEvent(_))
        ));
    }

    #[test]
    fn test_invalid_clip_rejected() {
        let config = RewardConfig {
            clip_min: 1.0,
            clip_max: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            RewardModel::new(config),
            Err(EngineError::Configuration(_))
        ));
    }
}
