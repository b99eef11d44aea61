// ============================================
// Profile Store (學習者畫像存儲)
// ============================================
//
// Owns one LearnerProfile per learner id and applies the update rules.
//
// Concurrency:
// - Profiles live in a DashMap; an update holds the shard write lock for
//   its learner, so updates to one learner are serialized while other
//   learners proceed in parallel.
//
// Replay handling is configurable (see ReplayPolicy).

pub mod profile;
pub mod store;

pub use profile::{LearnerProfile, ProfileSummary, DEFAULT_COMFORT};
pub use store::ProfileStore;

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What to do when an already-applied event id shows up again
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    /// Return the current snapshot unchanged
    Ignore,
    /// Fail with `DuplicateEvent`, leaving the profile untouched
    Reject,
    /// Apply it again as a fresh observation
    Reobserve,
}

impl FromStr for ReplayPolicy {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(ReplayPolicy::Ignore),
            "reject" => Ok(ReplayPolicy::Reject),
            "reobserve" => Ok(ReplayPolicy::Reobserve),
            other => Err(EngineError::Configuration(format!(
                "unknown replay policy `{}`",
                other
            ))),
        }
    }
}

/// Configuration for profile updates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Half-life, in events, of the exponentially-weighted estimates
    pub smoothing_half_life: f64,
    /// Capacity of the recent-event window
    pub buffer_capacity: usize,
    /// Base comfort adjustment per event
    pub comfort_step: f64,
    /// Latency z-score above which a response counts as excessively slow
    pub slow_latency_z: f64,
    /// Floor for the latency standard deviation (seconds)
    pub min_latency_std: f64,
    /// Latencies above this (seconds) are counted at this value in the
    /// smoothed statistics
    pub max_latency_secs: f64,
    /// Events needed before latency deviation is trusted
    pub min_samples_for_deviation: u32,
    /// Unknown learners are an error instead of being auto-created
    pub strict: bool,
    pub replay_policy: ReplayPolicy,
    /// Number of recent event ids remembered for replay detection
    pub replay_window: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            smoothing_half_life: 5.0,
            buffer_capacity: 20,
            comfort_step: 0.05,
            slow_latency_z: 2.0,
            min_latency_std: 0.5,
            max_latency_secs: 3_600.0,
            min_samples_for_deviation: 3,
            strict: false,
            replay_policy: ReplayPolicy::Ignore,
            replay_window: 256,
        }
    }
}

impl ProfileConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.smoothing_half_life.is_finite() && self.smoothing_half_life > 0.0) {
            return Err(EngineError::Configuration(format!(
                "smoothing_half_life must be > 0, got {}",
                self.smoothing_half_life
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(EngineError::Configuration(
                "buffer_capacity must be >= 1".to_string(),
            ));
        }
        if !(self.comfort_step > 0.0 && self.comfort_step <= 1.0) {
            return Err(EngineError::Configuration(format!(
                "comfort_step must be in (0, 1], got {}",
                self.comfort_step
            )));
        }
        if self.min_latency_std <= 0.0 {
            return Err(EngineError::Configuration(
                "min_latency_std must be > 0".to_string(),
            ));
        }
        if !(self.max_latency_secs.is_finite() && self.max_latency_secs > 0.0) {
            return Err(EngineError::Configuration(format!(
                "max_latency_secs must be finite and > 0, got {}",
                self.max_latency_secs
            )));
        }
        if self.replay_window == 0 {
            return Err(EngineError::Configuration(
                "replay_window must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
