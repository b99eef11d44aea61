//! Event schema for learner interaction streams
//!
//! Every interaction the engine consumes is an immutable `Event`. Producers
//! outside the core (the synthetic transcript generator, replay files) hand
//! over `RawInteractionRecord`s which map deterministically onto `Event`.
//! Batches travel inside a versioned `EventEnvelope`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod event;
pub mod record;

pub use event::{Event, Outcome, SignalTag};
pub use record::RawInteractionRecord;

/// Current schema version for all envelopes
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("schema version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

impl SchemaError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        SchemaError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Base envelope for batches of interaction data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Unique envelope ID for tracing
    pub envelope_id: Uuid,
    /// Envelope timestamp
    pub timestamp: DateTime<Utc>,
    /// Schema version for compatibility checking
    pub schema_version: u32,
    /// Producer that generated the payload
    pub source: String,
    /// Correlation ID, e.g. the persona prompt a transcript was generated from
    pub correlation_id: Option<Uuid>,
    /// Actual payload
    pub data: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(source: impl Into<String>, data: T) -> Self {
        Self {
            envelope_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            schema_version: SCHEMA_VERSION,
            source: source.into(),
            correlation_id: None,
            data,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Unwrap the payload after checking the schema version
    pub fn into_checked(self) -> Result<T, SchemaError> {
        if !is_compatible(SCHEMA_VERSION, self.schema_version) {
            return Err(SchemaError::VersionMismatch {
                expected: SCHEMA_VERSION,
                found: self.schema_version,
            });
        }
        Ok(self.data)
    }
}

// ============================================================================
// Version compatibility helpers
// ============================================================================

pub fn is_compatible(current_version: u32, message_version: u32) -> bool {
    // Exact match until a second schema version exists
    current_version == message_version
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_creation() {
        let event = Event::new("learner-1", "shapes-1", Outcome::Correct, 4.5, 1);

        let envelope = EventEnvelope::new("synthetic-generator", vec![event]);
        assert_eq!(envelope.schema_version, SCHEMA_VERSION);
        assert_eq!(envelope.source, "synthetic-generator");
        assert!(envelope.correlation_id.is_none());
    }

    #[test]
    fn test_version_compatibility() {
        assert!(is_compatible(SCHEMA_VERSION, SCHEMA_VERSION));
        assert!(!is_compatible(1, 2));
    }

    #[test]
    fn test_into_checked_rejects_future_version() {
        let mut envelope = EventEnvelope::new("replay", Vec::<Event>::new());
        envelope.schema_version = SCHEMA_VERSION + 1;

        let err = envelope.into_checked().unwrap_err();
        assert_eq!(
            err,
            SchemaError::VersionMismatch {
                expected: SCHEMA_VERSION,
                found: SCHEMA_VERSION + 1
            }
        );
    }
}
