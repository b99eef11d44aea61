// Raw interaction records as emitted by the synthetic transcript generator.
// Field names follow the generator's JSON; the mapping into `Event` is
// deterministic so that replaying a transcript twice yields identical ids.

use crate::{Event, Outcome, SchemaError, SignalTag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInteractionRecord {
    /// Producer-assigned id; derived from the record content when absent
    #[serde(default)]
    pub record_id: Option<Uuid>,
    pub learner_id: String,
    pub activity_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: String,
    pub latency_ms: i64,
    pub attempt: i64,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RawInteractionRecord {
    /// Content-derived id (UUID v5), stable across replays
    pub fn derived_id(&self) -> Uuid {
        let name = format!(
            "{}|{}|{}|{}",
            self.learner_id,
            self.activity_id,
            self.timestamp.to_rfc3339(),
            self.attempt
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }
}

impl TryFrom<RawInteractionRecord> for Event {
    type Error = SchemaError;

    fn try_from(record: RawInteractionRecord) -> Result<Self, Self::Error> {
        if record.latency_ms < 0 {
            return Err(SchemaError::invalid(
                "latency_ms",
                format!("must be >= 0, got {}", record.latency_ms),
            ));
        }
        let attempt_index = u32::try_from(record.attempt)
            .ok()
            .filter(|attempt| *attempt >= 1)
            .ok_or_else(|| {
                SchemaError::invalid(
                    "attempt",
                    format!("must be a positive integer, got {}", record.attempt),
                )
            })?;
        let outcome: Outcome = record.outcome.parse()?;
        let event_id = record.record_id.unwrap_or_else(|| record.derived_id());

        let event = Event {
            event_id,
            learner_id: record.learner_id,
            activity_id: record.activity_id,
            timestamp: record.timestamp,
            outcome,
            latency_secs: record.latency_ms as f64 / 1000.0,
            attempt_index,
            tags: record.tags.into_iter().map(SignalTag::from).collect(),
        };
        event.validate()?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RawInteractionRecord {
        RawInteractionRecord {
            record_id: None,
            learner_id: "Learner 1".to_string(),
            activity_id: "shapes-2".to_string(),
            timestamp: "2024-03-01T10:00:00Z".parse().unwrap(),
            outcome: "incorrect".to_string(),
            latency_ms: 12_500,
            attempt: 2,
            tags: vec!["multiple-retries".to_string()],
        }
    }

    #[test]
    fn test_record_maps_onto_event() {
        let event = Event::try_from(record()).unwrap();
        assert_eq!(event.learner_id, "Learner 1");
        assert_eq!(event.outcome, Outcome::Incorrect);
        assert!((event.latency_secs - 12.5).abs() < 1e-9);
        assert_eq!(event.attempt_index, 2);
        assert_eq!(event.tags, vec![SignalTag::MultipleRetries]);
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let a = Event::try_from(record()).unwrap();
        let b = Event::try_from(record()).unwrap();
        assert_eq!(a.event_id, b.event_id);
        assert_eq!(a, b);
    }

    #[test]
    fn test_explicit_record_id_is_kept() {
        let id = Uuid::new_v4();
        let mut raw = record();
        raw.record_id = Some(id);
        assert_eq!(Event::try_from(raw).unwrap().event_id, id);
    }

    #[test]
    fn test_rejects_negative_latency_and_bad_attempt() {
        let mut raw = record();
        raw.latency_ms = -1;
        assert!(Event::try_from(raw).is_err());

        let mut raw = record();
        raw.attempt = 0;
        assert!(matches!(
            Event::try_from(raw),
            Err(SchemaError::InvalidField {
                field: "attempt",
                ..
            })
        ));
    }

    #[test]
    fn test_parses_generator_json() {
        let json = r#"{
            "learner_id": "Learner 3",
            "activity_id": "actions-1",
            "timestamp": "2024-03-01T10:00:05Z",
            "outcome": "Correct",
            "latency_ms": 4000,
            "attempt": 1
        }"#;
        let raw: RawInteractionRecord = serde_json::from_str(json).unwrap();
        let event = Event::try_from(raw).unwrap();
        assert!(event.outcome.is_correct());
        assert!(event.tags.is_empty());
    }
}
