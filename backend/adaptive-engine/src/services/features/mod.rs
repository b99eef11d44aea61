// ============================================
// Feature Extractor
// ============================================
//
// Derives a fixed-size, normalized feature vector from a learner profile,
// the activity the learner is currently on, and the session context.
//
// Every feature lives in [0, 1]; the raw bounds used for normalization are
// listed in FEATURE_BOUNDS. A profile with an empty event window yields
// FeatureVector::cold_start.

use crate::models::{Activity, SessionContext};
use crate::services::profile_store::{LearnerProfile, DEFAULT_COMFORT};
use crate::utils::normalize_score;
use serde::{Deserialize, Serialize};

pub const FEATURE_DIM: usize = 10;

/// Documented raw bounds per feature, in vector order: (name, min, max).
/// Raw values outside the bounds are clamped.
pub const FEATURE_BOUNDS: [(&str, f64, f64); FEATURE_DIM] = [
    // ln(1 + mean latency seconds) against ln(1 + max_latency_secs)
    ("latency_level", 0.0, 1.0),
    // coefficient of variation of latency, std / mean
    ("latency_variability", 0.0, 2.0),
    // last latency z-score against the learner's own history
    ("latency_deviation", -3.0, 3.0),
    ("error_rate", 0.0, 1.0),
    // smoothed signed streak
    ("streak", -10.0, 10.0),
    ("comfort", 0.0, 1.0),
    // share of correct outcomes in the recent window
    ("recent_accuracy", 0.0, 1.0),
    ("hesitation", 0.0, 1.0),
    // normalized rank of the current activity's difficulty
    ("activity_difficulty", 0.0, 1.0),
    // step index over session horizon
    ("session_progress", 0.0, 1.0),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Latency that maps to a latency_level of 1.0 (seconds)
    pub max_latency_secs: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            max_latency_secs: 120.0,
        }
    }
}

/// Normalized decision state. Every field is in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    pub latency_level: f64,
    pub latency_variability: f64,
    /// 0.5 = typical for this learner, 0 = much faster, 1 = much slower
    pub latency_deviation: f64,
    pub error_rate: f64,
    /// 0.5 = no streak, 1 = long success run, 0 = long failure run
    pub streak: f64,
    pub comfort: f64,
    pub recent_accuracy: f64,
    pub hesitation: f64,
    pub activity_difficulty: f64,
    pub session_progress: f64,
}

impl FeatureVector {
    /// Defaults for a learner with no history:
    /// neutral latency (0.5), no variability, typical deviation (0.5),
    /// zero error rate, neutral streak (0.5), default comfort (0.5),
    /// neutral accuracy (0.5), no hesitation. Activity difficulty and
    /// session progress still come from the inputs.
    pub fn cold_start(activity: Option<&Activity>, context: &SessionContext) -> Self {
        Self {
            latency_level: 0.5,
            latency_variability: 0.0,
            latency_deviation: 0.5,
            error_rate: 0.0,
            streak: 0.5,
            comfort: DEFAULT_COMFORT,
            recent_accuracy: 0.5,
            hesitation: 0.0,
            activity_difficulty: activity.map(|a| a.difficulty.normalized()).unwrap_or(0.0),
            session_progress: context.progress(),
        }
    }

    pub fn as_array(&self) -> [f64; FEATURE_DIM] {
        [
            self.latency_level,
            self.latency_variability,
            self.latency_deviation,
            self.error_rate,
            self.streak,
            self.comfort,
            self.recent_accuracy,
            self.hesitation,
            self.activity_difficulty,
            self.session_progress,
        ]
    }
}

/// Pure, deterministic feature extraction
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn extract(
        &self,
        profile: &LearnerProfile,
        activity: Option<&Activity>,
        context: &SessionContext,
    ) -> FeatureVector {
        if profile.is_cold() {
            let mut cold = FeatureVector::cold_start(activity, context);
            // A reset-free profile may carry a non-default comfort
            cold.comfort = profile.comfort.clamp(0.0, 1.0);
            return cold;
        }

        let latency_level = normalize_score(
            profile.mean_latency.max(0.0).ln_1p(),
            0.0,
            self.config.max_latency_secs.max(f64::EPSILON).ln_1p(),
        );

        let (_, cv_min, cv_max) = FEATURE_BOUNDS[1];
        let latency_variability = if profile.mean_latency > f64::EPSILON {
            normalize_score(profile.latency_std() / profile.mean_latency, cv_min, cv_max)
        } else {
            0.0
        };

        let (_, z_min, z_max) = FEATURE_BOUNDS[2];
        let latency_deviation = normalize_score(profile.last_latency_z, z_min, z_max);

        let (_, s_min, s_max) = FEATURE_BOUNDS[4];
        let streak = normalize_score(profile.streak_estimate, s_min, s_max);

        let correct = profile
            .recent_events
            .iter()
            .filter(|event| event.outcome.is_correct())
            .count();
        let recent_accuracy = correct as f64 / profile.recent_events.len() as f64;

        FeatureVector {
            latency_level,
            latency_variability,
            latency_deviation,
            error_rate: profile.error_rate.clamp(0.0, 1.0),
            streak,
            comfort: profile.comfort.clamp(0.0, 1.0),
            recent_accuracy,
            hesitation: profile.hesitation_rate.clamp(0.0, 1.0),
            activity_difficulty: activity.map(|a| a.difficulty.normalized()).unwrap_or(0.0),
            session_progress: context.progress(),
        }
    }
}

/// Coarse latency regime relative to the learner's own baseline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LatencyBand {
    Fast,
    Normal,
    Slow,
}

/// Coarse streak regime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StreakBand {
    Failing,
    Neutral,
    Succeeding,
}

/// Abstracted state the value table is indexed by.
///
/// Carries no learner identity so estimates generalize across learners
/// whose profiles land in the same cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    /// Comfort quintile, 0..=4
    pub comfort_bucket: u8,
    /// Error-rate tercile, 0..=2
    pub error_bucket: u8,
    pub latency: LatencyBand,
    pub streak: StreakBand,
}

const COMFORT_BUCKETS: u8 = 5;
const ERROR_BUCKETS: u8 = 3;
// 0.5 ± 1/6 of the deviation range = ±1 z
const LATENCY_BAND_WIDTH: f64 = 1.0 / 6.0;
// 0.5 ± 0.05 of the streak range = ±1 smoothed run
const STREAK_BAND_WIDTH: f64 = 0.05;

fn bucket(value: f64, buckets: u8) -> u8 {
    ((value.clamp(0.0, 1.0) * buckets as f64).floor() as u8).min(buckets - 1)
}

impl StateKey {
    pub fn from_features(features: &FeatureVector) -> Self {
        let latency = if features.latency_deviation < 0.5 - LATENCY_BAND_WIDTH {
            LatencyBand::Fast
        } else if features.latency_deviation > 0.5 + LATENCY_BAND_WIDTH {
            LatencyBand::Slow
        } else {
            LatencyBand::Normal
        };
        let streak = if features.streak < 0.5 - STREAK_BAND_WIDTH {
            StreakBand::Failing
        } else if features.streak > 0.5 + STREAK_BAND_WIDTH {
            StreakBand::Succeeding
        } else {
            StreakBand::Neutral
        };

        Self {
            comfort_bucket: bucket(features.comfort, COMFORT_BUCKETS),
            error_bucket: bucket(features.error_rate, ERROR_BUCKETS),
            latency,
            streak,
        }
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "c{}/e{}/{:?}/{:?}",
            self.comfort_bucket, self.error_bucket, self.latency, self.streak
        )
    }
}
