pub mod catalog;
pub mod evaluation;
pub mod features;
pub mod persistence;
pub mod policy;
pub mod profile_store;
pub mod reward;
pub mod simulation;

pub use catalog::{ActivityCatalog, InMemoryCatalog};
pub use evaluation::{EvaluationReport, SimulationResults};
pub use features::{FeatureExtractor, FeatureVector, StateKey};
pub use persistence::{Restored, SessionSnapshot, SnapshotStore};
pub use policy::{EngineMode, PolicyEngine};
pub use profile_store::{LearnerProfile, ProfileStore};
pub use reward::RewardModel;
pub use simulation::{LearnerResponder, LearnerSession, RunReport, SimulationHarness, Trajectory};
