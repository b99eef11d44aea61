use crate::SchemaError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Result of one learner attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Correct,
    Incorrect,
    Skipped,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Correct => "correct",
            Outcome::Incorrect => "incorrect",
            Outcome::Skipped => "skipped",
        }
    }

    pub fn is_correct(&self) -> bool {
        matches!(self, Outcome::Correct)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = SchemaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "correct" | "right" | "success" => Ok(Outcome::Correct),
            "incorrect" | "wrong" | "failure" => Ok(Outcome::Incorrect),
            "skipped" | "skip" => Ok(Outcome::Skipped),
            other => Err(SchemaError::invalid(
                "outcome",
                format!("unrecognised outcome `{}`", other),
            )),
        }
    }
}

/// Free-form behavioural signal attached to an event
///
/// Serialized as a plain string; unknown strings are kept as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SignalTag {
    /// Learner walked away from the activity
    Abandoned,
    /// Several retries before the recorded outcome
    MultipleRetries,
    /// Learner asked for a hint
    HintRequested,
    Other(String),
}

impl SignalTag {
    /// Tags that point at frustration rather than plain hesitation
    pub fn is_frustration(&self) -> bool {
        matches!(self, SignalTag::Abandoned | SignalTag::MultipleRetries)
    }

    pub fn is_hesitation(&self) -> bool {
        !matches!(self, SignalTag::Other(_))
    }
}

impl From<String> for SignalTag {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "abandoned" => SignalTag::Abandoned,
            "multiple-retries" | "multiple_retries" => SignalTag::MultipleRetries,
            "hint-requested" | "hint_requested" => SignalTag::HintRequested,
            _ => SignalTag::Other(value),
        }
    }
}

impl From<SignalTag> for String {
    fn from(tag: SignalTag) -> Self {
        match tag {
            SignalTag::Abandoned => "abandoned".to_string(),
            SignalTag::MultipleRetries => "multiple-retries".to_string(),
            SignalTag::HintRequested => "hint-requested".to_string(),
            SignalTag::Other(value) => value,
        }
    }
}

/// One learner interaction. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Identity used for replay detection
    pub event_id: Uuid,
    pub learner_id: String,
    pub activity_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    /// Response latency in seconds, must be >= 0
    pub latency_secs: f64,
    /// Attempt index within the current activity, starting at 1
    pub attempt_index: u32,
    #[serde(default)]
    pub tags: Vec<SignalTag>,
}

impl Event {
    pub fn new(
        learner_id: impl Into<String>,
        activity_id: impl Into<String>,
        outcome: Outcome,
        latency_secs: f64,
        attempt_index: u32,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            learner_id: learner_id.into(),
            activity_id: activity_id.into(),
            timestamp: Utc::now(),
            outcome,
            latency_secs,
            attempt_index,
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<SignalTag>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn has_tag(&self, tag: &SignalTag) -> bool {
        self.tags.contains(tag)
    }

    /// Structural checks every consumer relies on
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.learner_id.trim().is_empty() {
            return Err(SchemaError::invalid("learner_id", "must not be empty"));
        }
        if self.activity_id.trim().is_empty() {
            return Err(SchemaError::invalid("activity_id", "must not be empty"));
        }
        if !self.latency_secs.is_finite() {
            return Err(SchemaError::invalid("latency_secs", "must be finite"));
        }
        if self.latency_secs < 0.0 {
            return Err(SchemaError::invalid(
                "latency_secs",
                format!("must be >= 0, got {}", self.latency_secs),
            ));
        }
        if self.attempt_index < 1 {
            return Err(SchemaError::invalid("attempt_index", "must be >= 1"));
        }
        Ok(())
    }
}
