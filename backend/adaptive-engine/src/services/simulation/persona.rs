// Simulated learner personas.
//
// Latency is drawn per difficulty (5–10 s for VeryEasy up to 70–80 s for
// Grandmaster). With trait sensitivity on, time beyond the learner's
// attention span is inflated by 1.2x, and the per-difficulty success
// probability is scaled by how well the learner's traits meet the lesson's
// demands plus a familiarity bonus. The learner retries until correct or
// until `max_attempts`, yielding one record per step.

use super::LearnerResponder;
use crate::error::Result;
use crate::models::{Activity, Difficulty};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use event_schema::{Outcome, RawInteractionRecord, SignalTag};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const ATTENTION_EXCESS_FACTOR: f64 = 1.2;
const MIN_SUCCESS_PROBABILITY: f64 = 0.05;
const MAX_SUCCESS_PROBABILITY: f64 = 0.99;
/// Attempts at one difficulty after which familiarity stops adding
const FAMILIARITY_SATURATION: f64 = 250.0;
/// Alignment below which a struggling learner asks for a hint
const HINT_ALIGNMENT: f64 = 0.75;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Communicability {
    Verbal,
    NonVerbal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TraitLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl TraitLevel {
    fn rank(&self) -> f64 {
        match self {
            TraitLevel::Low => 1.0,
            TraitLevel::Medium => 2.0,
            TraitLevel::High => 3.0,
            TraitLevel::VeryHigh => 4.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraitProfile {
    pub attention_span_mins: u32,
    pub communicability: Vec<Communicability>,
    pub communication: TraitLevel,
    pub motor_skills: TraitLevel,
}

fn coverage(have: f64, need: f64) -> f64 {
    if need <= 0.0 {
        1.0
    } else {
        (have / need).min(1.0)
    }
}

impl TraitProfile {
    pub fn new(
        attention_span_mins: u32,
        communicability: &[Communicability],
        communication: TraitLevel,
        motor_skills: TraitLevel,
    ) -> Self {
        Self {
            attention_span_mins,
            communicability: communicability.to_vec(),
            communication,
            motor_skills,
        }
    }

    /// What a lesson at `difficulty` demands of the learner
    pub fn required_for(difficulty: Difficulty) -> Self {
        use Communicability::*;
        use TraitLevel::*;
        match difficulty {
            Difficulty::VeryEasy => Self::new(1, &[NonVerbal], Low, Low),
            Difficulty::Easy => Self::new(2, &[NonVerbal], Medium, Low),
            Difficulty::Medium => Self::new(3, &[NonVerbal], Medium, Medium),
            Difficulty::Hard => Self::new(5, &[Verbal], High, Medium),
            Difficulty::VeryHard => Self::new(7, &[Verbal], High, High),
            Difficulty::Expert => Self::new(10, &[Verbal, NonVerbal], High, High),
            Difficulty::Master => Self::new(15, &[NonVerbal], High, VeryHigh),
            Difficulty::Grandmaster => Self::new(20, &[NonVerbal], High, VeryHigh),
        }
    }

    /// Share of the requirement this learner covers, in [0, 1]
    pub fn alignment(&self, required: &TraitProfile) -> f64 {
        let attention = coverage(
            self.attention_span_mins as f64,
            required.attention_span_mins as f64,
        );
        let modality = if required
            .communicability
            .iter()
            .any(|c| self.communicability.contains(c))
        {
            1.0
        } else {
            0.5
        };
        let communication = coverage(self.communication.rank(), required.communication.rank());
        let motor = coverage(self.motor_skills.rank(), required.motor_skills.rank());
        (attention + modality + communication + motor) / 4.0
    }

    /// Likeness of two learners in [0, 1]: attention span (0.4),
    /// shared communication modalities (0.4), same communication level (0.2)
    pub fn similarity(&self, other: &TraitProfile) -> f64 {
        let gap = (self.attention_span_mins as f64 - other.attention_span_mins as f64).abs();
        let attention = (1.0 - gap / 100.0).max(0.0);

        let widest = self.communicability.len().max(other.communicability.len());
        let modality = if widest == 0 {
            1.0
        } else {
            let shared = self
                .communicability
                .iter()
                .filter(|c| other.communicability.contains(c))
                .count();
            shared as f64 / widest as f64
        };

        let level = if self.communication == other.communication {
            1.0
        } else {
            0.0
        };

        0.4 * attention + 0.4 * modality + 0.2 * level
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Persona {
    pub learner_id: String,
    pub name: String,
    pub traits: TraitProfile,
}

impl Persona {
    pub fn new(learner_id: impl Into<String>, name: impl Into<String>, traits: TraitProfile) -> Self {
        Self {
            learner_id: learner_id.into(),
            name: name.into(),
            traits,
        }
    }

    /// The six reference learners, from least to most able
    pub fn builtin() -> Vec<Persona> {
        use Communicability::*;
        use TraitLevel::*;
        vec![
            Persona::new("learner-1", "Learner 1", TraitProfile::new(5, &[NonVerbal], Low, Low)),
            Persona::new("learner-2", "Learner 2", TraitProfile::new(6, &[NonVerbal], Medium, Low)),
            Persona::new(
                "learner-3",
                "Learner 3",
                TraitProfile::new(7, &[NonVerbal], Medium, Medium),
            ),
            Persona::new(
                "learner-4",
                "Learner 4",
                TraitProfile::new(9, &[NonVerbal, Verbal], Medium, High),
            ),
            Persona::new(
                "learner-5",
                "Learner 5",
                TraitProfile::new(12, &[NonVerbal, Verbal], High, High),
            ),
            Persona::new(
                "learner-6",
                "Learner 6",
                TraitProfile::new(15, &[NonVerbal, Verbal], High, VeryHigh),
            ),
        ]
    }
}

/// Latency range in seconds for one attempt at `difficulty`
pub fn latency_range(difficulty: Difficulty) -> (f64, f64) {
    match difficulty {
        Difficulty::VeryEasy => (5.0, 10.0),
        Difficulty::Easy => (10.0, 15.0),
        Difficulty::Medium => (20.0, 30.0),
        Difficulty::Hard => (30.0, 40.0),
        Difficulty::VeryHard => (40.0, 50.0),
        Difficulty::Expert => (50.0, 60.0),
        Difficulty::Master => (60.0, 70.0),
        Difficulty::Grandmaster => (70.0, 80.0),
    }
}

/// Chance of a correct attempt before trait and familiarity adjustments
pub fn base_success_probability(difficulty: Difficulty) -> f64 {
    match difficulty {
        Difficulty::VeryEasy => 0.95,
        Difficulty::Easy => 0.85,
        Difficulty::Medium => 0.7,
        Difficulty::Hard => 0.6,
        Difficulty::VeryHard => 0.55,
        Difficulty::Expert => 0.5,
        Difficulty::Master => 0.45,
        Difficulty::Grandmaster => 0.4,
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Familiarity {
    attempts: u32,
    successes: u32,
}

/// Stochastic responder driven by a persona
pub struct PersonaSimulator {
    persona: Persona,
    max_attempts: u32,
    trait_sensitivity: bool,
    rng: StdRng,
    familiarity: HashMap<Difficulty, Familiarity>,
    clock: DateTime<Utc>,
}

impl PersonaSimulator {
    pub fn new(persona: Persona, max_attempts: u32, trait_sensitivity: bool, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            persona,
            max_attempts: max_attempts.max(1),
            trait_sensitivity,
            rng,
            familiarity: HashMap::new(),
            clock: Utc::now(),
        }
    }

    pub fn with_clock(mut self, start: DateTime<Utc>) -> Self {
        self.clock = start;
        self
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    fn alignment(&self, difficulty: Difficulty) -> f64 {
        self.persona
            .traits
            .alignment(&TraitProfile::required_for(difficulty))
    }

    /// Probability that a single attempt at `difficulty` is correct
    pub fn success_probability(&self, difficulty: Difficulty) -> f64 {
        let familiarity = self
            .familiarity
            .get(&difficulty)
            .copied()
            .unwrap_or_default();
        let mut probability = base_success_probability(difficulty);

        if self.trait_sensitivity {
            let practice = (familiarity.attempts as f64 / FAMILIARITY_SATURATION).min(1.0);
            probability *= self.alignment(difficulty) + practice;
        }
        if familiarity.successes > 0 {
            probability += 0.1 * (familiarity.successes as f64 / 10.0).min(1.0);
        }
        probability.clamp(MIN_SUCCESS_PROBABILITY, MAX_SUCCESS_PROBABILITY)
    }

    fn latency(&mut self, difficulty: Difficulty) -> f64 {
        let (low, high) = latency_range(difficulty);
        let generated = self.rng.gen_range(low..high);
        if !self.trait_sensitivity {
            return generated;
        }
        let span_secs = self.persona.traits.attention_span_mins as f64 * 60.0;
        if generated > span_secs {
            generated + (generated - span_secs) * ATTENTION_EXCESS_FACTOR
        } else {
            generated
        }
    }
}

#[async_trait]
impl LearnerResponder for PersonaSimulator {
    async fn respond(
        &mut self,
        learner_id: &str,
        activity: &Activity,
        _step: u32,
    ) -> Result<Option<RawInteractionRecord>> {
        let difficulty = activity.difficulty;
        let probability = self.success_probability(difficulty);
        let latency = self.latency(difficulty);

        let mut attempts = 0;
        let mut correct = false;
        while attempts < self.max_attempts && !correct {
            attempts += 1;
            correct = self.rng.gen::<f64>() < probability;
        }

        let entry = self.familiarity.entry(difficulty).or_default();
        entry.attempts += attempts;
        if correct {
            entry.successes += 1;
        }

        let mut tags = Vec::new();
        if attempts > 2 {
            tags.push(SignalTag::MultipleRetries);
        }
        if !correct && self.max_attempts > 1 {
            tags.push(SignalTag::Abandoned);
        }
        if attempts > 1 && self.alignment(difficulty) < HINT_ALIGNMENT {
            tags.push(SignalTag::HintRequested);
        }

        let outcome = if correct {
            Outcome::Correct
        } else {
            Outcome::Incorrect
        };

        self.clock += Duration::milliseconds((latency * 1000.0) as i64);
        Ok(Some(RawInteractionRecord {
            record_id: None,
            learner_id: learner_id.to_string(),
            activity_id: activity.id.clone(),
            timestamp: self.clock,
            outcome: outcome.as_str().to_string(),
            latency_ms: (latency * 1000.0).round() as i64,
            attempt: attempts as i64,
            tags: tags.into_iter().map(String::from).collect(),
        }))
    }
}
