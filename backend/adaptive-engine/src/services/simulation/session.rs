use crate::error::{EngineError, Result};
use crate::models::{Activity, SessionContext};
use crate::services::catalog::ActivityCatalog;
use crate::services::features::{FeatureExtractor, FeatureVector};
use crate::services::policy::{EngineMode, LearnStep, PolicyEngine};
use crate::services::profile_store::{ProfileStore, ProfileSummary, ReplayPolicy};
use crate::services::reward::{RewardBreakdown, RewardModel};
use event_schema::Event;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// A selection waiting for the learner's response
#[derive(Debug, Clone)]
struct PendingDecision {
    features: FeatureVector,
    activity: Activity,
}

#[derive(Debug, Clone)]
pub struct Recommendation {
    pub activity: Activity,
    pub features: FeatureVector,
    pub epsilon: f64,
    pub mode: EngineMode,
}

/// Everything one observed event produced
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Decision state the reward is attributed to
    pub features: FeatureVector,
    pub recommended_id: Option<String>,
    /// Activity actually attempted (may differ when replaying)
    pub activity: Activity,
    pub reward: RewardBreakdown,
    pub profile: ProfileSummary,
    pub learn: LearnStep,
}

/// Where a learner stands in the catalog; persisted so a resumed session
/// keeps its unlocked activities and step count
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LearnerProgress {
    pub learner_id: String,
    pub step: u32,
    /// Sorted
    pub completed: Vec<String>,
    pub current_activity: Option<String>,
}

/// One learner's decision loop over the shared components
pub struct LearnerSession {
    learner_id: String,
    store: Arc<ProfileStore>,
    extractor: FeatureExtractor,
    reward: RewardModel,
    engine: PolicyEngine,
    catalog: Arc<dyn ActivityCatalog>,
    completed: HashSet<String>,
    current: Option<Activity>,
    pending: Option<PendingDecision>,
    step: u32,
    horizon: u32,
}

impl LearnerSession {
    pub fn new(
        learner_id: impl Into<String>,
        store: Arc<ProfileStore>,
        extractor: FeatureExtractor,
        reward: RewardModel,
        engine: PolicyEngine,
        catalog: Arc<dyn ActivityCatalog>,
        horizon: u32,
    ) -> Self {
        Self {
            learner_id: learner_id.into(),
            store,
            extractor,
            reward,
            engine,
            catalog,
            completed: HashSet::new(),
            current: None,
            pending: None,
            step: 0,
            horizon,
        }
    }

    pub fn learner_id(&self) -> &str {
        &self.learner_id
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut PolicyEngine {
        &mut self.engine
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn completed(&self) -> &HashSet<String> {
        &self.completed
    }

    fn context(&self) -> SessionContext {
        SessionContext::new(self.step, self.horizon)
    }

    pub fn progress(&self) -> LearnerProgress {
        let mut completed: Vec<String> = self.completed.iter().cloned().collect();
        completed.sort();
        LearnerProgress {
            learner_id: self.learner_id.clone(),
            step: self.step,
            completed,
            current_activity: self.current.as_ref().map(|a| a.id.clone()),
        }
    }

    /// Continue from saved progress. The horizon is extended by the steps
    /// already taken. Ids the catalog no longer knows are dropped.
    pub fn resume(&mut self, progress: LearnerProgress) -> Result<()> {
        if progress.learner_id != self.learner_id {
            return Err(EngineError::PolicyStateCorrupt(format!(
                "progress for learner {} loaded into session of {}",
                progress.learner_id, self.learner_id
            )));
        }

        let mut completed = HashSet::with_capacity(progress.completed.len());
        for id in progress.completed {
            if self.catalog.get(&id).is_some() {
                completed.insert(id);
            } else {
                warn!(learner_id = %self.learner_id, activity_id = %id, "Dropping unknown completed activity");
            }
        }

        self.completed = completed;
        self.current = progress
            .current_activity
            .and_then(|id| self.catalog.get(&id));
        self.pending = None;
        self.horizon = self.horizon.saturating_add(progress.step);
        self.step = progress.step;
        Ok(())
    }

    /// Select the next activity from the catalog's eligible set
    pub fn recommend(&mut self) -> Result<Recommendation> {
        let candidates = self.catalog.eligible(&self.completed);
        self.recommend_from(&candidates)
    }

    /// Select the next activity from an explicit candidate set
    pub fn recommend_from(&mut self, candidates: &[Activity]) -> Result<Recommendation> {
        let profile = self.store.get(&self.learner_id)?;
        let features = self
            .extractor
            .extract(&profile, self.current.as_ref(), &self.context());
        let epsilon = self.engine.epsilon();

        let chosen_id = self.engine.select(&features, candidates)?;
        let activity = candidates
            .iter()
            .find(|a| a.id == chosen_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownActivity(chosen_id.clone()))?;

        self.pending = Some(PendingDecision {
            features,
            activity: activity.clone(),
        });

        Ok(Recommendation {
            activity,
            features,
            epsilon,
            mode: self.engine.mode(),
        })
    }

    /// Incorporate the learner's response and learn from it.
    ///
    /// Rejected events leave profile, policy and pending decision untouched.
    pub fn observe(&mut self, event: &Event) -> Result<StepOutcome> {
        let attempted = self
            .catalog
            .get(&event.activity_id)
            .ok_or_else(|| EngineError::UnknownActivity(event.activity_id.clone()))?;

        let before = self.store.get(&self.learner_id)?;
        let replayed = before.has_seen(&event.event_id);

        // Without a pending decision (stream not driven by recommend) the
        // decision state is reconstructed from the pre-event profile
        let features = match &self.pending {
            Some(pending) => pending.features,
            None => self
                .extractor
                .extract(&before, self.current.as_ref(), &self.context()),
        };

        let updated = self.store.update(&self.learner_id, event)?;
        if replayed && self.store.config().replay_policy == ReplayPolicy::Ignore {
            return Err(EngineError::DuplicateEvent(event.event_id));
        }

        let reward = self.reward.breakdown(&features, event, &updated)?;

        if event.outcome.is_correct() {
            self.completed.insert(attempted.id.clone());
        }
        self.current = Some(attempted.clone());
        self.step += 1;

        let next_features = self
            .extractor
            .extract(&updated, Some(&attempted), &self.context());
        let next_candidates = self.catalog.eligible(&self.completed);
        let learn = self.engine.learn(
            &features,
            &attempted,
            reward.total,
            &next_features,
            &next_candidates,
        )?;

        let recommended_id = self.pending.take().map(|p| p.activity.id);

        debug!(
            learner_id = %self.learner_id,
            step = self.step,
            activity_id = %attempted.id,
            outcome = %event.outcome,
            reward = reward.total,
            comfort = updated.comfort,
            mode = %learn.mode,
            "Step observed"
        );

        Ok(StepOutcome {
            features,
            recommended_id,
            activity: attempted,
            reward,
            profile: updated.summary(),
            learn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Difficulty;
    use crate::services::catalog::{InMemoryCatalog, MockActivityCatalog};
    use crate::services::policy::{ExplorationSchedule, PolicyConfig};
    use crate::services::profile_store::ProfileConfig;
    use event_schema::Outcome;

    fn session_with(catalog: Arc<dyn ActivityCatalog>, replay: ReplayPolicy) -> LearnerSession {
        let store = Arc::new(
            ProfileStore::new(ProfileConfig {
                replay_policy: replay,
                ..Default::default()
            })
            .unwrap(),
        );
        let engine = PolicyEngine::new(
            "l1",
            PolicyConfig {
                exploration: ExplorationSchedule::Constant { epsilon: 0.0 },
                seed: Some(11),
                ..Default::default()
            },
        )
        .unwrap();
        LearnerSession::new(
            "l1",
            store,
            FeatureExtractor::default(),
            RewardModel::default(),
            engine,
            catalog,
            50,
        )
    }

    #[test]
    fn test_cold_start_recommendation() {
        let mut session = session_with(Arc::new(InMemoryCatalog::shapes()), ReplayPolicy::Ignore);
        let recommendation = session.recommend().unwrap();
        assert_eq!(recommendation.activity.id, "shapes-1");
        assert_eq!(recommendation.features.comfort, 0.5);
        assert_eq!(recommendation.mode, EngineMode::Exploring);
    }

    #[test]
    fn test_correct_answer_unlocks_next_lesson() {
        let mut session = session_with(Arc::new(InMemoryCatalog::shapes()), ReplayPolicy::Ignore);
        let first = session.recommend().unwrap();
        let event = Event::new("l1", first.activity.id.clone(), Outcome::Correct, 6.0, 1);
        let outcome = session.observe(&event).unwrap();

        assert_eq!(outcome.recommended_id.as_deref(), Some("shapes-1"));
        assert!(outcome.reward.total > 0.0);
        assert!(session.completed().contains("shapes-1"));
        assert_eq!(session.step(), 1);
    }

    #[test]
    fn test_empty_catalog_surfaces_error() {
        let mut catalog = MockActivityCatalog::new();
        catalog.expect_eligible().returning(|_| Vec::new());
        let mut session = session_with(Arc::new(catalog), ReplayPolicy::Ignore);
        assert!(matches!(
            session.recommend(),
            Err(EngineError::EmptyCandidateSet(_))
        ));
    }

    #[test]
    fn test_unknown_activity_is_recoverable() {
        let mut session = session_with(Arc::new(InMemoryCatalog::shapes()), ReplayPolicy::Ignore);
        let event = Event::new("l1", "colours-1", Outcome::Correct, 6.0, 1);
        let err = session.observe(&event).unwrap_err();
        assert!(matches!(err, EngineError::UnknownActivity(_)));
        assert!(err.is_recoverable());
        assert_eq!(session.step(), 0);
    }

    #[test]
    fn test_replayed_event_does_not_learn_twice() {
        let mut session = session_with(Arc::new(InMemoryCatalog::shapes()), ReplayPolicy::Ignore);
        let event = Event::new("l1", "shapes-1", Outcome::Correct, 6.0, 1);
        session.observe(&event).unwrap();
        let visits_before: u64 = session.engine().table().entries().iter().map(|e| e.visits).sum();

        assert!(matches!(
            session.observe(&event),
            Err(EngineError::DuplicateEvent(_))
        ));
        let visits_after: u64 = session.engine().table().entries().iter().map(|e| e.visits).sum();
        assert_eq!(visits_before, visits_after);
        assert_eq!(session.step(), 1);
    }

    #[test]
    fn test_progress_resumes_unlocked_activities() {
        let mut session = session_with(Arc::new(InMemoryCatalog::shapes()), ReplayPolicy::Ignore);
        for level in 1..=3 {
            let event = Event::new("l1", format!("shapes-{}", level), Outcome::Correct, 6.0, 1);
            session.observe(&event).unwrap();
        }
        let progress = session.progress();
        assert_eq!(progress.step, 3);
        assert_eq!(progress.completed, vec!["shapes-1", "shapes-2", "shapes-3"]);
        assert_eq!(progress.current_activity.as_deref(), Some("shapes-3"));

        let mut resumed = session_with(Arc::new(InMemoryCatalog::shapes()), ReplayPolicy::Ignore);
        resumed.resume(progress.clone()).unwrap();
        assert_eq!(resumed.step(), 3);
        assert_eq!(resumed.progress(), progress);
        let unlocked = InMemoryCatalog::shapes().eligible(resumed.completed());
        assert!(unlocked.iter().any(|a| a.id == "shapes-4"));
        // The current activity carries over into the features
        let recommendation = resumed.recommend().unwrap();
        assert_eq!(
            recommendation.features.activity_difficulty,
            Difficulty::Medium.normalized()
        );

        let mut other = session_with(Arc::new(InMemoryCatalog::shapes()), ReplayPolicy::Ignore);
        let foreign = LearnerProgress {
            learner_id: "l2".to_string(),
            ..progress
        };
        assert!(matches!(
            other.resume(foreign),
            Err(EngineError::PolicyStateCorrupt(_))
        ));
    }

    #[test]
    fn test_resume_drops_unknown_activities() {
        let mut session = session_with(Arc::new(InMemoryCatalog::shapes()), ReplayPolicy::Ignore);
        session
            .resume(LearnerProgress {
                learner_id: "l1".to_string(),
                step: 7,
                completed: vec!["shapes-1".to_string(), "colours-1".to_string()],
                current_activity: Some("colours-1".to_string()),
            })
            .unwrap();
        assert_eq!(session.completed().len(), 1);
        assert!(session.completed().contains("shapes-1"));
        assert_eq!(session.progress().current_activity, None);
    }

    #[test]
    fn test_off_policy_event_credits_attempted_activity() {
        let catalog = InMemoryCatalog::new(vec![
            Activity::new("easy", Difficulty::Easy),
            Activity::new("hard", Difficulty::Hard),
        ])
        .unwrap();
        let mut session = session_with(Arc::new(catalog), ReplayPolicy::Ignore);
        let recommendation = session.recommend().unwrap();
        let attempted = if recommendation.activity.id == "easy" { "hard" } else { "easy" };

        let outcome = session
            .observe(&Event::new("l1", attempted, Outcome::Correct, 5.0, 1))
            .unwrap();
        assert_eq!(outcome.activity.id, attempted);
        let entries = session.engine().table().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].activity_id, attempted);
    }
}
