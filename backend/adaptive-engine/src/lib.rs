pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{EngineError, Result};
pub use services::{
    ActivityCatalog, FeatureExtractor, InMemoryCatalog, LearnerSession, PolicyEngine,
    ProfileStore, RewardModel, SimulationHarness,
};
