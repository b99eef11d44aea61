use super::{LearnerProgress, LearnerResponder, LearnerSession, SimulationConfig, TraitProfile};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::models::Difficulty;
use crate::services::catalog::ActivityCatalog;
use crate::services::features::{FeatureExtractor, FeatureVector};
use crate::services::policy::{
    EngineMode, PeerRegistry, PolicyConfig, PolicyEngine, PolicyScope, PolicySnapshot, ValueTable,
};
use crate::services::profile_store::{ProfileStore, ProfileSummary};
use crate::services::reward::{RewardBreakdown, RewardModel};
use event_schema::{Event, Outcome};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// One (features, action, reward, resulting profile) record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryStep {
    pub step: u32,
    pub recommended_id: Option<String>,
    pub activity_id: String,
    pub difficulty: Difficulty,
    pub outcome: Outcome,
    pub attempt_index: u32,
    pub latency_secs: f64,
    pub features: FeatureVector,
    pub reward: RewardBreakdown,
    pub profile: ProfileSummary,
    pub mode: EngineMode,
    pub epsilon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mastered: Option<Difficulty>,
}

/// An event the pipeline refused; counted, never silently dropped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedEvent {
    pub step: u32,
    pub event_id: Option<Uuid>,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub learner_id: String,
    pub steps: Vec<TrajectoryStep>,
    pub rejected: Vec<RejectedEvent>,
    /// Stopped early by the shutdown signal
    pub cancelled: bool,
    pub policy: PolicySnapshot,
    pub progress: LearnerProgress,
}

impl Trajectory {
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }

    pub fn total_reward(&self) -> f64 {
        self.steps.iter().map(|s| s.reward.total).sum()
    }
}

/// A learner whose run ended on a fatal error
#[derive(Debug)]
pub struct LearnerFailure {
    pub learner_id: String,
    pub error: EngineError,
    /// Steps completed before the error; None if the session never started
    pub partial: Option<Trajectory>,
}

impl std::fmt::Display for LearnerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "learner {}: {}", self.learner_id, self.error)
    }
}

/// Outcome of `run_all`: one entry per learner in exactly one of the lists
#[derive(Debug, Default)]
pub struct RunReport {
    /// Ordered by learner id
    pub trajectories: Vec<Trajectory>,
    /// Ordered by learner id
    pub failures: Vec<LearnerFailure>,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Finished trajectories plus the partial ones of failed learners
    pub fn resumable(&self) -> impl Iterator<Item = &Trajectory> {
        self.trajectories
            .iter()
            .chain(self.failures.iter().filter_map(|f| f.partial.as_ref()))
    }
}

/// Runs learner sessions against shared components
pub struct SimulationHarness {
    store: Arc<ProfileStore>,
    extractor: FeatureExtractor,
    reward: RewardModel,
    policy: PolicyConfig,
    simulation: SimulationConfig,
    catalog: Arc<dyn ActivityCatalog>,
    /// Present when the policy scope is Shared
    shared_table: Option<Arc<ValueTable>>,
    /// Present when the policy scope is Collaborative
    peers: Option<Arc<PeerRegistry>>,
    traits: HashMap<String, TraitProfile>,
    restored: HashMap<String, PolicySnapshot>,
    progress: HashMap<String, LearnerProgress>,
}

impl SimulationHarness {
    pub fn new(config: &Config, catalog: Arc<dyn ActivityCatalog>) -> Result<Self> {
        config.validate()?;
        let (shared_table, peers) = match config.policy.scope {
            PolicyScope::Shared => (Some(Arc::new(ValueTable::new())), None),
            PolicyScope::Collaborative => (None, Some(Arc::new(PeerRegistry::new()))),
            PolicyScope::PerLearner => (None, None),
        };
        Ok(Self {
            store: Arc::new(ProfileStore::new(config.profile.clone())?),
            extractor: FeatureExtractor::new(config.features.clone()),
            reward: RewardModel::new(config.reward.clone())?,
            policy: config.policy.clone(),
            simulation: config.simulation.clone(),
            catalog,
            shared_table,
            peers,
            traits: HashMap::new(),
            restored: HashMap::new(),
            progress: HashMap::new(),
        })
    }

    pub fn store(&self) -> &Arc<ProfileStore> {
        &self.store
    }

    pub fn simulation_config(&self) -> &SimulationConfig {
        &self.simulation
    }

    pub fn peers(&self) -> Option<&Arc<PeerRegistry>> {
        self.peers.as_ref()
    }

    /// Policy state to resume learners from, keyed by learner id
    pub fn with_policies(mut self, snapshots: Vec<PolicySnapshot>) -> Self {
        self.restored = snapshots
            .into_iter()
            .map(|snapshot| (snapshot.learner_id.clone(), snapshot))
            .collect();
        self
    }

    /// Catalog progress to resume learners from, keyed by learner id
    pub fn with_progress(mut self, progress: Vec<LearnerProgress>) -> Self {
        self.progress = progress
            .into_iter()
            .map(|p| (p.learner_id.clone(), p))
            .collect();
        self
    }

    /// Learner traits used for peer similarity in the collaborative scope
    pub fn with_traits(mut self, traits: impl IntoIterator<Item = (String, TraitProfile)>) -> Self {
        self.traits.extend(traits);
        self
    }

    /// Fresh (or resumed) session for one learner
    pub fn session(&self, learner_id: &str) -> Result<LearnerSession> {
        let mut engine = match (&self.shared_table, &self.peers) {
            (Some(table), _) => {
                PolicyEngine::with_table(learner_id, self.policy.clone(), Arc::clone(table))?
            }
            (None, Some(peers)) => PolicyEngine::collaborative(
                learner_id,
                self.policy.clone(),
                Arc::clone(peers),
                self.traits.get(learner_id).cloned(),
            )?,
            (None, None) => PolicyEngine::new(learner_id, self.policy.clone())?,
        };
        if let Some(snapshot) = self.restored.get(learner_id) {
            engine.restore(snapshot.clone())?;
            info!(learner_id = learner_id, "Policy state restored");
        }
        let mut session = LearnerSession::new(
            learner_id,
            Arc::clone(&self.store),
            self.extractor.clone(),
            self.reward.clone(),
            engine,
            Arc::clone(&self.catalog),
            self.simulation.steps_per_learner,
        );
        if let Some(progress) = self.progress.get(learner_id) {
            session.resume(progress.clone())?;
            info!(
                learner_id = learner_id,
                step = progress.step,
                completed = progress.completed.len(),
                "Session progress restored"
            );
        }
        Ok(session)
    }

    /// Run one learner's trajectory to completion, exhaustion or shutdown.
    ///
    /// Per-event errors are recorded in the trajectory. Anything else ends
    /// the run; the steps taken so far come back in the failure.
    pub async fn run_learner(
        &self,
        learner_id: &str,
        responder: &mut dyn LearnerResponder,
        shutdown: watch::Receiver<bool>,
    ) -> std::result::Result<Trajectory, LearnerFailure> {
        let mut session = self.session(learner_id).map_err(|error| LearnerFailure {
            learner_id: learner_id.to_string(),
            error,
            partial: None,
        })?;
        let mut steps = Vec::new();
        let mut rejected = Vec::new();
        let mut cancelled = false;
        let mut fatal = None;

        for step in 0..self.simulation.steps_per_learner {
            if *shutdown.borrow() {
                info!(learner_id = learner_id, step = step, "Shutdown requested, stopping trajectory");
                cancelled = true;
                break;
            }

            let recommendation = match session.recommend() {
                Ok(recommendation) => recommendation,
                Err(err) => {
                    fatal = Some(err);
                    break;
                }
            };
            let record = match responder
                .respond(learner_id, &recommendation.activity, step)
                .await
            {
                Ok(Some(record)) => record,
                Ok(None) => {
                    info!(learner_id = learner_id, step = step, "Interaction stream exhausted");
                    break;
                }
                Err(err) => {
                    fatal = Some(err);
                    break;
                }
            };

            let event = match Event::try_from(record) {
                Ok(event) => event,
                Err(err) => {
                    let err = EngineError::from(err);
                    warn!(learner_id = learner_id, step = step, error = %err, "Record rejected");
                    rejected.push(RejectedEvent {
                        step,
                        event_id: None,
                        kind: err.kind().to_string(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            match session.observe(&event) {
                Ok(outcome) => steps.push(TrajectoryStep {
                    step,
                    recommended_id: outcome.recommended_id,
                    activity_id: outcome.activity.id,
                    difficulty: outcome.activity.difficulty,
                    outcome: event.outcome,
                    attempt_index: event.attempt_index,
                    latency_secs: event.latency_secs,
                    features: outcome.features,
                    reward: outcome.reward,
                    profile: outcome.profile,
                    mode: outcome.learn.mode,
                    epsilon: recommendation.epsilon,
                    mastered: outcome.learn.mastered,
                }),
                Err(err) if err.is_recoverable() => {
                    warn!(
                        learner_id = learner_id,
                        step = step,
                        event_id = %event.event_id,
                        error = %err,
                        "Event rejected"
                    );
                    rejected.push(RejectedEvent {
                        step,
                        event_id: Some(event.event_id),
                        kind: err.kind().to_string(),
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    fatal = Some(err);
                    break;
                }
            }
        }

        let trajectory = Trajectory {
            learner_id: learner_id.to_string(),
            steps,
            rejected,
            cancelled,
            policy: session.engine().snapshot(),
            progress: session.progress(),
        };

        if let Some(error) = fatal {
            error!(
                learner_id = learner_id,
                steps = trajectory.steps.len(),
                error = %error,
                "Trajectory aborted"
            );
            return Err(LearnerFailure {
                learner_id: learner_id.to_string(),
                error,
                partial: Some(trajectory),
            });
        }

        info!(
            learner_id = learner_id,
            steps = trajectory.steps.len(),
            rejected = trajectory.rejected_count(),
            total_reward = trajectory.total_reward(),
            mode = %session.engine().mode(),
            "Trajectory finished"
        );

        Ok(trajectory)
    }

    /// Run every learner as an independent task. One learner failing does
    /// not discard the others; every learner ends up in exactly one list of
    /// the report.
    pub async fn run_all(
        self: &Arc<Self>,
        learners: Vec<(String, Box<dyn LearnerResponder>)>,
        shutdown: watch::Receiver<bool>,
    ) -> RunReport {
        let mut tasks = JoinSet::new();
        let mut pending = BTreeSet::new();

        for (learner_id, mut responder) in learners {
            let harness = Arc::clone(self);
            let shutdown = shutdown.clone();
            pending.insert(learner_id.clone());
            tasks.spawn(async move {
                harness
                    .run_learner(&learner_id, responder.as_mut(), shutdown)
                    .await
            });
        }

        let mut report = RunReport::default();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Ok(trajectory)) => {
                    pending.remove(&trajectory.learner_id);
                    report.trajectories.push(trajectory);
                }
                Ok(Err(failure)) => {
                    error!("Simulation error: {}", failure);
                    pending.remove(&failure.learner_id);
                    report.failures.push(failure);
                }
                Err(e) => error!("Task error: {}", e),
            }
        }

        // Whatever is left panicked or was aborted
        for learner_id in pending {
            report.failures.push(LearnerFailure {
                learner_id,
                error: EngineError::Io("simulation task failed".to_string()),
                partial: None,
            });
        }

        report.trajectories.sort_by(|a, b| a.learner_id.cmp(&b.learner_id));
        report.failures.sort_by(|a, b| a.learner_id.cmp(&b.learner_id));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::InMemoryCatalog;
    use crate::services::policy::ExplorationSchedule;
    use crate::services::simulation::{MockLearnerResponder, Persona, PersonaSimulator, ReplaySource};
    use chrono::Utc;
    use event_schema::RawInteractionRecord;

    fn config(steps: u32) -> Config {
        let mut config = Config::default();
        config.simulation.steps_per_learner = steps;
        config.policy.seed = Some(5);
        config
    }

    fn harness(config: &Config) -> Arc<SimulationHarness> {
        Arc::new(SimulationHarness::new(config, Arc::new(InMemoryCatalog::shapes())).unwrap())
    }

    fn record(learner: &str, activity: &str) -> RawInteractionRecord {
        RawInteractionRecord {
            record_id: Some(Uuid::new_v4()),
            learner_id: learner.to_string(),
            activity_id: activity.to_string(),
            timestamp: Utc::now(),
            outcome: "correct".to_string(),
            latency_ms: 5_000,
            attempt: 1,
            tags: vec![],
        }
    }

    fn persona(index: usize) -> Box<dyn LearnerResponder> {
        Box::new(PersonaSimulator::new(Persona::builtin()[index].clone(), 4, true, Some(index as u64)))
    }

    #[tokio::test]
    async fn test_run_learner_records_every_step() {
        let harness = harness(&config(30));
        let (_tx, rx) = watch::channel(false);
        let mut responder = PersonaSimulator::new(Persona::builtin()[3].clone(), 4, true, Some(1));
        let trajectory = harness.run_learner("learner-4", &mut responder, rx).await.unwrap();

        assert_eq!(trajectory.steps.len(), 30);
        assert!(trajectory.rejected.is_empty());
        assert!(!trajectory.cancelled);
        for step in &trajectory.steps {
            assert!((-1.0..=1.0).contains(&step.reward.total));
            assert!((0.0..=1.0).contains(&step.profile.comfort));
        }
        // Only the entry lesson is eligible at the start
        assert_eq!(trajectory.steps[0].activity_id, "shapes-1");
    }

    #[tokio::test]
    async fn test_shutdown_before_start_keeps_empty_partial_trajectory() {
        let harness = harness(&config(30));
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let mut responder = MockLearnerResponder::new();
        responder.expect_respond().never();
        let trajectory = harness.run_learner("learner-1", &mut responder, rx).await.unwrap();
        assert!(trajectory.cancelled);
        assert!(trajectory.steps.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_records_are_counted_not_fatal() {
        let harness = harness(&config(3));
        let (_tx, rx) = watch::channel(false);
        let mut responder = MockLearnerResponder::new();
        let mut calls = 0;
        responder.expect_respond().times(3).returning(move |learner, activity, _| {
            calls += 1;
            Ok(Some(RawInteractionRecord {
                record_id: None,
                learner_id: learner.to_string(),
                activity_id: activity.id.clone(),
                timestamp: Utc::now(),
                outcome: "correct".to_string(),
                // Second record carries a negative latency
                latency_ms: if calls == 2 { -5 } else { 3_000 },
                attempt: 1,
                tags: vec![],
            }))
        });

        let trajectory = harness.run_learner("l1", &mut responder, rx).await.unwrap();
        assert_eq!(trajectory.steps.len(), 2);
        assert_eq!(trajectory.rejected_count(), 1);
        assert_eq!(trajectory.rejected[0].kind, "invalid_event");
        assert_eq!(trajectory.rejected[0].step, 1);
    }

    #[tokio::test]
    async fn test_replay_stops_when_exhausted() {
        let harness = harness(&config(50));
        let (_tx, rx) = watch::channel(false);
        let records = (1..=3)
            .map(|level| RawInteractionRecord {
                record_id: None,
                learner_id: "r1".to_string(),
                activity_id: format!("shapes-{}", level),
                timestamp: Utc::now(),
                outcome: "correct".to_string(),
                latency_ms: 5_000,
                attempt: 1,
                tags: vec![],
            })
            .collect();
        let mut source = ReplaySource::new(records);
        let trajectory = harness.run_learner("r1", &mut source, rx).await.unwrap();
        let attempted: Vec<&str> = trajectory.steps.iter().map(|s| s.activity_id.as_str()).collect();
        assert_eq!(attempted, vec!["shapes-1", "shapes-2", "shapes-3"]);
    }

    #[tokio::test]
    async fn test_run_all_is_ordered_and_parallel_safe() {
        let harness = harness(&config(20));
        let (_tx, rx) = watch::channel(false);
        let learners = vec![
            ("learner-2".to_string(), persona(1)),
            ("learner-1".to_string(), persona(0)),
            ("learner-6".to_string(), persona(5)),
        ];
        let report = harness.run_all(learners, rx).await;
        assert!(report.is_complete());
        let trajectories = report.trajectories;
        let ids: Vec<&str> = trajectories.iter().map(|t| t.learner_id.as_str()).collect();
        assert_eq!(ids, vec!["learner-1", "learner-2", "learner-6"]);
        assert!(trajectories.iter().all(|t| t.steps.len() == 20));
        assert_eq!(harness.store().len(), 3);
    }

    #[tokio::test]
    async fn test_shared_scope_pools_estimates() {
        let mut config = config(10);
        config.policy.scope = PolicyScope::Shared;
        config.policy.exploration = ExplorationSchedule::Constant { epsilon: 0.0 };
        let harness = harness(&config);
        let (_tx, rx) = watch::channel(false);
        let learners = vec![
            ("a".to_string(), persona(4)),
            ("b".to_string(), persona(5)),
        ];
        let trajectories = harness.run_all(learners, rx).await.trajectories;
        // The last learner to finish snapshots updates from both
        let visits = trajectories
            .iter()
            .map(|t| t.policy.values.iter().map(|e| e.visits).sum::<u64>())
            .max()
            .unwrap();
        assert_eq!(visits, 20);
    }

    #[tokio::test]
    async fn test_fatal_error_keeps_partial_trajectory() {
        let harness = harness(&config(10));
        let (_tx, rx) = watch::channel(false);
        let mut responder = MockLearnerResponder::new();
        responder.expect_respond().returning(|learner, activity, step| {
            if step == 3 {
                return Err(EngineError::Io("generator unavailable".to_string()));
            }
            Ok(Some(record(learner, &activity.id)))
        });

        let failure = harness.run_learner("l1", &mut responder, rx).await.unwrap_err();
        assert_eq!(failure.learner_id, "l1");
        assert!(matches!(failure.error, EngineError::Io(_)));
        let partial = failure.partial.unwrap();
        assert_eq!(partial.steps.len(), 3);
        assert_eq!(partial.progress.step, 3);
        assert!(!partial.cancelled);
    }

    #[tokio::test]
    async fn test_one_failing_learner_does_not_discard_the_rest() {
        let harness = harness(&config(40));
        let (_tx, rx) = watch::channel(false);
        let mut broken = MockLearnerResponder::new();
        broken.expect_respond().returning(|learner, activity, step| {
            if step == 5 {
                return Err(EngineError::Io("generator unavailable".to_string()));
            }
            Ok(Some(record(learner, &activity.id)))
        });
        let learners = vec![
            ("learner-1".to_string(), persona(0)),
            ("broken".to_string(), Box::new(broken) as Box<dyn LearnerResponder>),
        ];

        let report = harness.run_all(learners, rx).await;
        assert!(!report.is_complete());
        assert_eq!(report.trajectories.len(), 1);
        assert_eq!(report.trajectories[0].learner_id, "learner-1");
        assert_eq!(report.trajectories[0].steps.len(), 40);

        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.learner_id, "broken");
        assert_eq!(failure.partial.as_ref().map(|t| t.steps.len()), Some(5));
        assert_eq!(report.resumable().count(), 2);
    }

    #[tokio::test]
    async fn test_resumed_session_continues_progress() {
        let harness = harness(&config(6));
        let (_tx, rx) = watch::channel(false);
        let mut responder = MockLearnerResponder::new();
        responder
            .expect_respond()
            .returning(|learner, activity, _| Ok(Some(record(learner, &activity.id))));
        let first = harness.run_learner("l1", &mut responder, rx).await.unwrap();
        assert!(first.progress.completed.contains(&"shapes-1".to_string()));

        let resumed = SimulationHarness::new(&config(6), Arc::new(InMemoryCatalog::shapes()))
            .unwrap()
            .with_policies(vec![first.policy.clone()])
            .with_progress(vec![first.progress.clone()]);
        let session = resumed.session("l1").unwrap();
        assert_eq!(session.step(), 6);
        assert_eq!(session.progress(), first.progress);
    }

    #[tokio::test]
    async fn test_collaborative_scope_registers_every_learner() {
        let mut config = config(15);
        config.policy.scope = PolicyScope::Collaborative;
        let traits = Persona::builtin()
            .into_iter()
            .map(|p| (p.learner_id, p.traits));
        let harness = Arc::new(
            SimulationHarness::new(&config, Arc::new(InMemoryCatalog::shapes()))
                .unwrap()
                .with_traits(traits),
        );
        let (_tx, rx) = watch::channel(false);
        let learners = vec![
            ("learner-5".to_string(), persona(4)),
            ("learner-6".to_string(), persona(5)),
            ("learner-1".to_string(), persona(0)),
        ];

        let report = harness.run_all(learners, rx).await;
        assert!(report.is_complete());
        assert!(report.trajectories.iter().all(|t| t.steps.len() == 15));
        let peers = harness.peers().unwrap();
        assert_eq!(peers.len(), 3);
        // Tables stay private
        for trajectory in &report.trajectories {
            let visits: u64 = trajectory.policy.values.iter().map(|e| e.visits).sum();
            assert_eq!(visits, 15);
        }
        let mentor = peers.most_similar("learner-5").unwrap();
        assert_ne!(mentor.learner_id, "learner-5");
        assert!(mentor.similarity <= 1.0);
    }
}
