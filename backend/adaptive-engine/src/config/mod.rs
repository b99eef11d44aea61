use crate::error::Result;
use crate::services::features::FeatureConfig;
use crate::services::policy::{ExplorationSchedule, MasteryConfig, PolicyConfig, PolicyScope};
use crate::services::profile_store::{ProfileConfig, ReplayPolicy};
use crate::services::reward::RewardConfig;
use crate::services::simulation::SimulationConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub profile: ProfileConfig,
    pub features: FeatureConfig,
    pub reward: RewardConfig,
    pub policy: PolicyConfig,
    pub simulation: SimulationConfig,
}

/// `ENGINE_*` variables. Anything unset keeps its default.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    smoothing_half_life: Option<f64>,
    buffer_capacity: Option<usize>,
    comfort_step: Option<f64>,
    max_latency_secs: Option<f64>,
    strict: Option<bool>,
    replay_policy: Option<String>,
    learning_rate: Option<f64>,
    discount: Option<f64>,
    /// Fixes epsilon instead of the decaying schedule
    epsilon: Option<f64>,
    value_decay: Option<f64>,
    convergence_window: Option<usize>,
    drift_threshold: Option<f64>,
    scope: Option<String>,
    /// Either mastery setting turns the progression gate on
    mastery_threshold: Option<f64>,
    mastery_min_attempts: Option<u32>,
    seed: Option<u64>,
    clip_min: Option<f64>,
    clip_max: Option<f64>,
    steps: Option<u32>,
    max_attempts: Option<u32>,
    trait_sensitivity: Option<bool>,
    module: Option<String>,
    output_path: Option<PathBuf>,
    snapshot_path: Option<PathBuf>,
    allow_reset_on_corrupt: Option<bool>,
    replay_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let overrides: EnvOverrides = envy::prefixed("ENGINE_").from_env()?;
        Self::with_overrides(overrides)
    }

    /// Same as `from_env` but over an explicit variable list
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let overrides: EnvOverrides = envy::prefixed("ENGINE_").from_iter(vars)?;
        Self::with_overrides(overrides)
    }

    fn with_overrides(env: EnvOverrides) -> Result<Self> {
        let mut config = Config::default();

        let profile = &mut config.profile;
        if let Some(v) = env.smoothing_half_life {
            profile.smoothing_half_life = v;
        }
        if let Some(v) = env.buffer_capacity {
            profile.buffer_capacity = v;
        }
        if let Some(v) = env.comfort_step {
            profile.comfort_step = v;
        }
        if let Some(v) = env.max_latency_secs {
            profile.max_latency_secs = v;
        }
        if let Some(v) = env.strict {
            profile.strict = v;
        }
        if let Some(v) = env.replay_policy {
            profile.replay_policy = v.parse::<ReplayPolicy>()?;
        }

        let policy = &mut config.policy;
        if let Some(v) = env.learning_rate {
            policy.learning_rate = v;
        }
        if let Some(v) = env.discount {
            policy.discount = v;
        }
        if let Some(epsilon) = env.epsilon {
            policy.exploration = ExplorationSchedule::Constant { epsilon };
        }
        if let Some(v) = env.value_decay {
            policy.value_decay = v;
        }
        if let Some(v) = env.convergence_window {
            policy.convergence.window = v;
        }
        if let Some(v) = env.drift_threshold {
            policy.convergence.drift_threshold = v;
        }
        if let Some(v) = env.scope {
            policy.scope = v.parse::<PolicyScope>()?;
        }
        if env.mastery_threshold.is_some() || env.mastery_min_attempts.is_some() {
            let mut mastery = policy.mastery.unwrap_or_default();
            if let Some(v) = env.mastery_threshold {
                mastery.threshold = v;
            }
            if let Some(v) = env.mastery_min_attempts {
                mastery.min_attempts = v;
            }
            policy.mastery = Some(mastery);
        }

        if let Some(v) = env.clip_min {
            config.reward.clip_min = v;
        }
        if let Some(v) = env.clip_max {
            config.reward.clip_max = v;
        }

        let simulation = &mut config.simulation;
        if let Some(v) = env.steps {
            simulation.steps_per_learner = v;
        }
        if let Some(v) = env.max_attempts {
            simulation.max_attempts = v;
        }
        if let Some(v) = env.trait_sensitivity {
            simulation.trait_sensitivity = v;
        }
        if let Some(v) = env.module {
            simulation.module = v;
        }
        if let Some(v) = env.output_path {
            simulation.output_path = v;
        }
        simulation.snapshot_path = env.snapshot_path.or(simulation.snapshot_path.take());
        if let Some(v) = env.allow_reset_on_corrupt {
            simulation.allow_reset_on_corrupt = v;
        }
        simulation.replay_path = env.replay_path.or(simulation.replay_path.take());

        // one seed drives both personas and exploration
        if env.seed.is_some() {
            config.policy.seed = env.seed;
            config.simulation.seed = env.seed;
        }

        config.validate()?;
        Ok(config)
    }

    /// Fatal at session start
    pub fn validate(&self) -> Result<()> {
        self.profile.validate()?;
        self.reward.validate()?;
        self.policy.validate()?;
        self.simulation.validate()
    }
}
