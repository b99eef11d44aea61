use super::{LearnerProfile, ProfileConfig, ReplayPolicy};
use crate::error::{EngineError, Result};
use crate::utils::smoothing_alpha;
use dashmap::DashMap;
use event_schema::Event;
use tracing::{debug, warn};

/// In-memory profile store keyed by learner id
pub struct ProfileStore {
    profiles: DashMap<String, LearnerProfile>,
    config: ProfileConfig,
    alpha: f64,
}

impl ProfileStore {
    pub fn new(config: ProfileConfig) -> Result<Self> {
        config.validate()?;
        let alpha = smoothing_alpha(config.smoothing_half_life);
        Ok(Self {
            profiles: DashMap::new(),
            config,
            alpha,
        })
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    /// Smoothing weight derived from the configured half-life
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Initialize a learner explicitly. Required before use in strict mode;
    /// an existing profile is left as it is.
    pub fn register(&self, learner_id: &str) -> LearnerProfile {
        self.profiles
            .entry(learner_id.to_string())
            .or_insert_with(|| LearnerProfile::new(learner_id))
            .clone()
    }

    /// Current profile snapshot; auto-creates a default profile unless strict
    pub fn get(&self, learner_id: &str) -> Result<LearnerProfile> {
        if let Some(profile) = self.profiles.get(learner_id) {
            return Ok(profile.clone());
        }
        if self.config.strict {
            return Err(EngineError::UnknownLearner(learner_id.to_string()));
        }
        Ok(self.register(learner_id))
    }

    /// Incorporate one event and return the updated snapshot.
    ///
    /// Malformed events are rejected before any mutation.
    pub fn update(&self, learner_id: &str, event: &Event) -> Result<LearnerProfile> {
        event.validate()?;
        if event.learner_id != learner_id {
            return Err(EngineError::InvalidEvent(format!(
                "event belongs to learner {}, not {}",
                event.learner_id, learner_id
            )));
        }

        let mut profile = if self.config.strict {
            self.profiles
                .get_mut(learner_id)
                .ok_or_else(|| EngineError::UnknownLearner(learner_id.to_string()))?
        } else {
            self.profiles
                .entry(learner_id.to_string())
                .or_insert_with(|| LearnerProfile::new(learner_id))
        };

        if profile.has_seen(&event.event_id) {
            match self.config.replay_policy {
                ReplayPolicy::Ignore => {
                    debug!(
                        learner_id = learner_id,
                        event_id = %event.event_id,
                        "Replayed event ignored"
                    );
                    return Ok(profile.clone());
                }
                ReplayPolicy::Reject => {
                    return Err(EngineError::DuplicateEvent(event.event_id));
                }
                ReplayPolicy::Reobserve => {
                    debug!(
                        learner_id = learner_id,
                        event_id = %event.event_id,
                        "Replayed event applied again"
                    );
                }
            }
        }

        profile.apply(event, &self.config, self.alpha);

        debug!(
            learner_id = learner_id,
            outcome = %event.outcome,
            comfort = profile.comfort,
            error_rate = profile.error_rate,
            "Profile updated"
        );

        Ok(profile.clone())
    }

    /// Restore defaults for a learner (new learner or session boundary)
    pub fn reset(&self, learner_id: &str) -> Result<LearnerProfile> {
        if self.config.strict && !self.profiles.contains_key(learner_id) {
            return Err(EngineError::UnknownLearner(learner_id.to_string()));
        }
        let fresh = LearnerProfile::new(learner_id);
        self.profiles.insert(learner_id.to_string(), fresh.clone());
        Ok(fresh)
    }

    /// All profiles, ordered by learner id
    pub fn snapshot_all(&self) -> Vec<LearnerProfile> {
        let mut profiles: Vec<LearnerProfile> =
            self.profiles.iter().map(|entry| entry.value().clone()).collect();
        profiles.sort_by(|a, b| a.learner_id.cmp(&b.learner_id));
        profiles
    }

    /// Load previously persisted profiles. Nothing is inserted if any
    /// profile violates its invariants.
    pub fn restore(&self, profiles: Vec<LearnerProfile>) -> Result<()> {
        for profile in &profiles {
            profile.check_invariants().map_err(|reason| {
                EngineError::PolicyStateCorrupt(format!(
                    "profile {}: {}",
                    profile.learner_id, reason
                ))
            })?;
        }
        for mut profile in profiles {
            if profile.recent_events.len() > self.config.buffer_capacity {
                warn!(
                    learner_id = %profile.learner_id,
                    "Restored event window larger than configured capacity, truncating"
                );
                let excess = profile.recent_events.len() - self.config.buffer_capacity;
                profile.recent_events.drain(..excess);
            }
            self.profiles.insert(profile.learner_id.clone(), profile);
        }
        Ok(())
    }
}
