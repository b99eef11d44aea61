// ============================================
// Simulation Harness
// ============================================
//
// Drives the per-interaction loop for one or many learners:
//
//   recommend (profile → features → select)
//     → responder produces a raw record → Event
//     → observe (profile update → reward → learn)
//
// A single learner's trajectory is strictly sequential. Learners run as
// independent tasks; the only state they can share is the value table
// when the policy scope is Shared, or read access to each other's tables
// when it is Collaborative. A learner that fails keeps its partial
// trajectory and does not stop the others.
//
// Cancellation is cooperative: the shutdown flag is checked between steps
// and the partial trajectory is kept.

pub mod harness;
pub mod persona;
pub mod replay;
pub mod session;

pub use harness::{
    LearnerFailure, RejectedEvent, RunReport, SimulationHarness, Trajectory, TrajectoryStep,
};
pub use persona::{Communicability, Persona, PersonaSimulator, TraitLevel, TraitProfile};
pub use replay::ReplaySource;
pub use session::{LearnerProgress, LearnerSession, Recommendation, StepOutcome};

use crate::error::{EngineError, Result};
use crate::models::Activity;
use async_trait::async_trait;
use event_schema::RawInteractionRecord;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Event producer at the harness boundary (persona simulator, transcript
/// replay, or an external generator).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LearnerResponder: Send {
    /// The learner's response to `activity` at `step`; `None` once the
    /// stream is exhausted.
    async fn respond(
        &mut self,
        learner_id: &str,
        activity: &Activity,
        step: u32,
    ) -> Result<Option<RawInteractionRecord>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub steps_per_learner: u32,
    /// Attempts a simulated learner makes before abandoning an activity
    pub max_attempts: u32,
    /// Persona traits affect latency and correctness
    pub trait_sensitivity: bool,
    /// Built-in catalog module: "shapes", "actions" or "all"
    pub module: String,
    pub output_path: PathBuf,
    /// Resume from / save to this snapshot when set
    pub snapshot_path: Option<PathBuf>,
    /// Start from defaults when the snapshot cannot be decoded
    pub allow_reset_on_corrupt: bool,
    /// Replay this transcript instead of simulating personas
    pub replay_path: Option<PathBuf>,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            steps_per_learner: 200,
            max_attempts: 4,
            trait_sensitivity: true,
            module: "shapes".to_string(),
            output_path: PathBuf::from("simulation_results.json"),
            snapshot_path: None,
            allow_reset_on_corrupt: false,
            replay_path: None,
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.steps_per_learner == 0 {
            return Err(EngineError::Configuration(
                "steps_per_learner must be >= 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(EngineError::Configuration(
                "max_attempts must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
