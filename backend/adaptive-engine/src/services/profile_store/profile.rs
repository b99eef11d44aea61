// ============================================
// Learner Profile (學習者畫像)
// ============================================
//
// Bounded-recency summary of one learner:
// 1. Exponentially-weighted latency mean / variance
// 2. Exponentially-weighted error and hesitation rates
// 3. Signed streak (current + smoothed)
// 4. Difficulty comfort level in [0, 1]
// 5. FIFO window of the most recent raw events

use super::ProfileConfig;
use crate::utils::{ew_mean, ew_mean_variance};
use chrono::{DateTime, Utc};
use event_schema::{Event, Outcome};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

pub const DEFAULT_COMFORT: f64 = 0.5;

/// Failure streak length from which failures count as repeated
const REPEATED_FAILURE_STREAK: i32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearnerProfile {
    pub learner_id: String,
    /// Smoothed response latency (seconds)
    pub mean_latency: f64,
    /// Smoothed latency variance (seconds²)
    pub latency_variance: f64,
    /// Smoothed error rate in [0, 1]
    pub error_rate: f64,
    /// Smoothed signed streak; positive = run of successes
    pub streak_estimate: f64,
    /// Signed length of the current run
    pub current_streak: i32,
    /// Difficulty comfort level in [0, 1]
    pub comfort: f64,
    /// Smoothed share of events carrying hesitation signals
    pub hesitation_rate: f64,
    /// Latency z-score of the last event against the learner's own history
    pub last_latency_z: f64,
    /// Total events applied since the last reset
    pub observations: u64,
    pub recent_events: VecDeque<Event>,
    /// Ids of recently applied events, for replay detection
    pub recent_event_ids: VecDeque<Uuid>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Light per-step view of a profile for trajectory logs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProfileSummary {
    pub comfort: f64,
    pub error_rate: f64,
    pub mean_latency: f64,
    pub latency_variance: f64,
    pub streak_estimate: f64,
    pub observations: u64,
}

impl LearnerProfile {
    pub fn new(learner_id: impl Into<String>) -> Self {
        Self {
            learner_id: learner_id.into(),
            mean_latency: 0.0,
            latency_variance: 0.0,
            error_rate: 0.0,
            streak_estimate: 0.0,
            current_streak: 0,
            comfort: DEFAULT_COMFORT,
            hesitation_rate: 0.0,
            last_latency_z: 0.0,
            observations: 0,
            recent_events: VecDeque::new(),
            recent_event_ids: VecDeque::new(),
            updated_at: None,
        }
    }

    pub fn is_cold(&self) -> bool {
        self.recent_events.is_empty()
    }

    pub fn latency_std(&self) -> f64 {
        self.latency_variance.sqrt()
    }

    pub fn has_seen(&self, event_id: &Uuid) -> bool {
        self.recent_event_ids.contains(event_id)
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            comfort: self.comfort,
            error_rate: self.error_rate,
            mean_latency: self.mean_latency,
            latency_variance: self.latency_variance,
            streak_estimate: self.streak_estimate,
            observations: self.observations,
        }
    }

    /// Checks the invariants a restored profile must satisfy
    pub fn check_invariants(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.comfort) {
            return Err(format!("comfort {} outside [0, 1]", self.comfort));
        }
        if !(0.0..=1.0).contains(&self.error_rate) {
            return Err(format!("error rate {} outside [0, 1]", self.error_rate));
        }
        if !self.mean_latency.is_finite() || self.mean_latency < 0.0 {
            return Err(format!("mean latency {} invalid", self.mean_latency));
        }
        if !self.latency_variance.is_finite() || self.latency_variance < 0.0 {
            return Err(format!("latency variance {} invalid", self.latency_variance));
        }
        Ok(())
    }

    /// Latency z-score against this learner's own history.
    /// Zero until enough samples exist to trust the baseline.
    pub fn latency_z(&self, latency_secs: f64, config: &ProfileConfig) -> f64 {
        if self.observations < config.min_samples_for_deviation as u64 {
            return 0.0;
        }
        let std = self.latency_std().max(config.min_latency_std);
        (latency_secs - self.mean_latency) / std
    }

    /// Incorporate one validated event. `alpha` is the smoothing weight.
    pub(crate) fn apply(&mut self, event: &Event, config: &ProfileConfig, alpha: f64) {
        // Capped so one pathological sample cannot overflow the variance
        let latency = event.latency_secs.min(config.max_latency_secs);
        let z = self.latency_z(latency, config);
        self.last_latency_z = z;

        if self.observations == 0 {
            self.mean_latency = latency;
            self.latency_variance = 0.0;
        } else {
            let (mean, variance) =
                ew_mean_variance(self.mean_latency, self.latency_variance, latency, alpha);
            self.mean_latency = mean;
            self.latency_variance = variance;
        }

        let is_error = if event.outcome.is_correct() { 0.0 } else { 1.0 };
        self.error_rate = ew_mean(self.error_rate, is_error, alpha).clamp(0.0, 1.0);

        self.current_streak = match event.outcome {
            Outcome::Correct => self.current_streak.max(0) + 1,
            Outcome::Incorrect => self.current_streak.min(0) - 1,
            Outcome::Skipped => 0,
        };
        self.streak_estimate = ew_mean(self.streak_estimate, self.current_streak as f64, alpha);

        let hesitated = event.attempt_index > 1 || event.tags.iter().any(|t| t.is_hesitation());
        let hesitation = if hesitated { 1.0 } else { 0.0 };
        self.hesitation_rate = ew_mean(self.hesitation_rate, hesitation, alpha).clamp(0.0, 1.0);

        self.comfort = (self.comfort + self.comfort_delta(event, z, config)).clamp(0.0, 1.0);

        self.recent_events.push_back(event.clone());
        while self.recent_events.len() > config.buffer_capacity {
            self.recent_events.pop_front();
        }
        self.recent_event_ids.push_back(event.event_id);
        while self.recent_event_ids.len() > config.replay_window {
            self.recent_event_ids.pop_front();
        }

        self.observations += 1;
        self.updated_at = Some(event.timestamp);
    }

    /// Comfort moves up on efficient success, down on failure, skips and
    /// excessive latency. `current_streak` already includes the event.
    fn comfort_delta(&self, event: &Event, z: f64, config: &ProfileConfig) -> f64 {
        let step = config.comfort_step;
        let too_slow = z > config.slow_latency_z;

        let mut delta = match event.outcome {
            Outcome::Correct if too_slow => -0.5 * step,
            Outcome::Correct => step / event.attempt_index as f64,
            Outcome::Incorrect if self.current_streak <= -REPEATED_FAILURE_STREAK => -1.5 * step,
            Outcome::Incorrect => -step,
            Outcome::Skipped => -0.5 * step,
        };
        if too_slow && !event.outcome.is_correct() {
            delta -= 0.5 * step;
        }
        if delta > 0.0 && event.tags.iter().any(|t| t.is_frustration()) {
            delta *= 0.5;
        }
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::smoothing_alpha;
    use event_schema::SignalTag;

    fn config() -> ProfileConfig {
        ProfileConfig::default()
    }

    fn apply(profile: &mut LearnerProfile, outcome: Outcome, latency: f64, attempt: u32) {
        let cfg = config();
        let event = Event::new(profile.learner_id.clone(), "a", outcome, latency, attempt);
        profile.apply(&event, &cfg, smoothing_alpha(cfg.smoothing_half_life));
    }

    #[test]
    fn test_defaults() {
        let profile = LearnerProfile::new("l1");
        assert_eq!(profile.comfort, DEFAULT_COMFORT);
        assert_eq!(profile.error_rate, 0.0);
        assert_eq!(profile.observations, 0);
        assert!(profile.is_cold());
    }

    #[test]
    fn test_first_event_seeds_latency_mean() {
        let mut profile = LearnerProfile::new("l1");
        apply(&mut profile, Outcome::Correct, 8.0, 1);
        assert_eq!(profile.mean_latency, 8.0);
        assert_eq!(profile.latency_variance, 0.0);
        assert_eq!(profile.last_latency_z, 0.0);
    }

    #[test]
    fn test_error_rate_moves_toward_evidence() {
        let mut profile = LearnerProfile::new("l1");
        apply(&mut profile, Outcome::Incorrect, 5.0, 1);
        let after_one = profile.error_rate;
        assert!(after_one > 0.0 && after_one <= 1.0);
        apply(&mut profile, Outcome::Incorrect, 5.0, 1);
        assert!(profile.error_rate > after_one);
        apply(&mut profile, Outcome::Correct, 5.0, 1);
        assert!(profile.error_rate < 1.0);
    }

    #[test]
    fn test_streak_tracking() {
        let mut profile = LearnerProfile::new("l1");
        apply(&mut profile, Outcome::Correct, 5.0, 1);
        apply(&mut profile, Outcome::Correct, 5.0, 1);
        assert_eq!(profile.current_streak, 2);
        apply(&mut profile, Outcome::Incorrect, 5.0, 1);
        assert_eq!(profile.current_streak, -1);
        apply(&mut profile, Outcome::Skipped, 5.0, 1);
        assert_eq!(profile.current_streak, 0);
    }

    #[test]
    fn test_later_attempt_success_raises_comfort_less() {
        let mut first = LearnerProfile::new("l1");
        let mut third = LearnerProfile::new("l2");
        apply(&mut first, Outcome::Correct, 5.0, 1);
        apply(&mut third, Outcome::Correct, 5.0, 3);
        assert!(first.comfort > third.comfort);
        assert!(third.comfort > DEFAULT_COMFORT);
    }

    #[test]
    fn test_buffer_is_bounded_fifo() {
        let mut profile = LearnerProfile::new("l1");
        let cfg = config();
        for i in 0..(cfg.buffer_capacity + 5) {
            apply(&mut profile, Outcome::Correct, i as f64, 1);
        }
        assert_eq!(profile.recent_events.len(), cfg.buffer_capacity);
        // Oldest five were evicted
        assert_eq!(profile.recent_events.front().unwrap().latency_secs, 5.0);
    }

    #[test]
    fn test_slow_latency_relative_to_own_baseline() {
        let cfg = config();
        let mut profile = LearnerProfile::new("slow-but-steady");
        for latency in [40.0, 42.0, 38.0, 41.0, 39.0] {
            apply(&mut profile, Outcome::Correct, latency, 1);
        }
        // 41s is ordinary for this learner
        assert!(profile.latency_z(41.0, &cfg).abs() < cfg.slow_latency_z);
        // 4s is unusually fast for this learner
        assert!(profile.latency_z(4.0, &cfg) < -cfg.slow_latency_z);
    }

    #[test]
    fn test_extreme_latency_keeps_statistics_finite() {
        let cfg = config();
        let mut profile = LearnerProfile::new("l1");
        for latency in [5.0, 6.0, 1e200, 5.0] {
            apply(&mut profile, Outcome::Correct, latency, 1);
        }
        assert!(profile.latency_variance.is_finite());
        assert!(profile.mean_latency <= cfg.max_latency_secs);
        assert!(profile.check_invariants().is_ok());
    }

    #[test]
    fn test_frustration_tag_dampens_comfort_gain() {
        let cfg = config();
        let alpha = smoothing_alpha(cfg.smoothing_half_life);
        let mut plain = LearnerProfile::new("l1");
        let mut tagged = LearnerProfile::new("l2");
        plain.apply(&Event::new("l1", "a", Outcome::Correct, 5.0, 1), &cfg, alpha);
        tagged.apply(
            &Event::new("l2", "a", Outcome::Correct, 5.0, 1).with_tags(vec![SignalTag::Abandoned]),
            &cfg,
            alpha,
        );
        assert!(plain.comfort > tagged.comfort);
        assert!(tagged.hesitation_rate > 0.0);
    }

    #[test]
    fn test_check_invariants() {
        let mut profile = LearnerProfile::new("l1");
        assert!(profile.check_invariants().is_ok());
        profile.comfort = 1.5;
        assert!(profile.check_invariants().is_err());
    }
}
