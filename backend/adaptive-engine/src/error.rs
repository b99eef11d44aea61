use event_schema::SchemaError;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Unknown learner: {0}")]
    UnknownLearner(String),

    #[error("No eligible activities for learner {0}")]
    EmptyCandidateSet(String),

    #[error("Policy state corrupt: {0}")]
    PolicyStateCorrupt(String),

    #[error("Event {0} was already applied")]
    DuplicateEvent(Uuid),

    #[error("Unknown activity: {0}")]
    UnknownActivity(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Per-event errors: the caller logs and skips, the trajectory goes on.
    /// Everything else is fatal for the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidEvent(_)
                | EngineError::DuplicateEvent(_)
                | EngineError::UnknownActivity(_)
        )
    }

    /// Short machine-readable label used in trajectory logs
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidEvent(_) => "invalid_event",
            EngineError::UnknownLearner(_) => "unknown_learner",
            EngineError::EmptyCandidateSet(_) => "empty_candidate_set",
            EngineError::PolicyStateCorrupt(_) => "policy_state_corrupt",
            EngineError::DuplicateEvent(_) => "duplicate_event",
            EngineError::UnknownActivity(_) => "unknown_activity",
            EngineError::Configuration(_) => "configuration",
            EngineError::Io(_) => "io",
            EngineError::Serialization(_) => "serialization",
        }
    }
}

// Implement conversions from other error types
impl From<SchemaError> for EngineError {
    fn from(err: SchemaError) -> Self {
        EngineError::InvalidEvent(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

impl From<envy::Error> for EngineError {
    fn from(err: envy::Error) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(EngineError::InvalidEvent("x".into()).is_recoverable());
        assert!(EngineError::DuplicateEvent(Uuid::nil()).is_recoverable());
        assert!(!EngineError::EmptyCandidateSet("l".into()).is_recoverable());
        assert!(!EngineError::PolicyStateCorrupt("bad".into()).is_recoverable());
        assert!(!EngineError::Configuration("bad".into()).is_recoverable());
    }

    #[test]
    fn test_schema_error_maps_to_invalid_event() {
        let err: EngineError = SchemaError::invalid("latency_secs", "must be >= 0").into();
        assert_eq!(err.kind(), "invalid_event");
    }
}
