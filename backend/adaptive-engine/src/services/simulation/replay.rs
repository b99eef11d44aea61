use super::LearnerResponder;
use crate::error::Result;
use crate::models::Activity;
use async_trait::async_trait;
use event_schema::{EventEnvelope, RawInteractionRecord};
use std::collections::VecDeque;
use std::path::Path;
use tracing::info;

/// Replays a recorded transcript. The offered activity is ignored; the
/// engine learns off-policy from whatever the learner actually attempted.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    records: VecDeque<RawInteractionRecord>,
}

impl ReplaySource {
    pub fn new(records: Vec<RawInteractionRecord>) -> Self {
        Self {
            records: records.into(),
        }
    }

    /// Unwraps a versioned transcript envelope
    pub fn from_envelope(envelope: EventEnvelope<Vec<RawInteractionRecord>>) -> Result<Self> {
        Ok(Self::new(envelope.into_checked()?))
    }

    /// Loads a transcript file: a versioned envelope or a bare record array
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let source = match serde_json::from_str::<EventEnvelope<Vec<RawInteractionRecord>>>(&raw) {
            Ok(envelope) => Self::from_envelope(envelope)?,
            Err(_) => Self::new(serde_json::from_str(&raw)?),
        };
        info!(
            path = %path.display(),
            records = source.len(),
            "Transcript loaded"
        );
        Ok(source)
    }

    /// Learner ids in first-appearance order
    pub fn learner_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for record in &self.records {
            if !ids.contains(&record.learner_id) {
                ids.push(record.learner_id.clone());
            }
        }
        ids
    }

    /// Records belonging to one learner, in transcript order
    pub fn for_learner(&self, learner_id: &str) -> Self {
        Self {
            records: self
                .records
                .iter()
                .filter(|r| r.learner_id == learner_id)
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl LearnerResponder for ReplaySource {
    async fn respond(
        &mut self,
        _learner_id: &str,
        _activity: &Activity,
        _step: u32,
    ) -> Result<Option<RawInteractionRecord>> {
        Ok(self.records.pop_front())
    }
}
