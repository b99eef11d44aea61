// ============================================
// Evaluation (學習曲線)
// ============================================
//
// Turns trajectories into learning curves (step, cumulative reward,
// comfort, error rate) and a per-run summary, and writes the results file.

use crate::error::Result;
use crate::models::Difficulty;
use crate::services::policy::EngineMode;
use crate::services::simulation::{LearnerFailure, Trajectory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CurvePoint {
    pub step: u32,
    pub cumulative_reward: f64,
    pub comfort: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningCurve {
    pub learner_id: String,
    pub points: Vec<CurvePoint>,
}

pub fn learning_curve(trajectory: &Trajectory) -> LearningCurve {
    let mut cumulative = 0.0;
    let points = trajectory
        .steps
        .iter()
        .map(|step| {
            cumulative += step.reward.total;
            CurvePoint {
                step: step.step,
                cumulative_reward: cumulative,
                comfort: step.profile.comfort,
                error_rate: step.profile.error_rate,
            }
        })
        .collect();
    LearningCurve {
        learner_id: trajectory.learner_id.clone(),
        points,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearnerSummary {
    pub learner_id: String,
    pub steps: usize,
    pub rejected: usize,
    pub total_reward: f64,
    pub mean_reward: f64,
    /// Share of steps answered correctly
    pub accuracy: f64,
    pub final_comfort: Option<f64>,
    pub final_error_rate: Option<f64>,
    pub highest_difficulty: Option<Difficulty>,
    pub final_mode: EngineMode,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationReport {
    pub learners: Vec<LearnerSummary>,
    pub mean_total_reward: f64,
    pub total_rejected: usize,
    pub converged_learners: usize,
}

fn summarize_one(trajectory: &Trajectory) -> LearnerSummary {
    let steps = trajectory.steps.len();
    let total_reward = trajectory.total_reward();
    let correct = trajectory
        .steps
        .iter()
        .filter(|s| s.outcome.is_correct())
        .count();
    let last = trajectory.steps.last();

    LearnerSummary {
        learner_id: trajectory.learner_id.clone(),
        steps,
        rejected: trajectory.rejected_count(),
        total_reward,
        mean_reward: if steps == 0 { 0.0 } else { total_reward / steps as f64 },
        accuracy: if steps == 0 { 0.0 } else { correct as f64 / steps as f64 },
        final_comfort: last.map(|s| s.profile.comfort),
        final_error_rate: last.map(|s| s.profile.error_rate),
        highest_difficulty: trajectory.steps.iter().map(|s| s.difficulty).max(),
        final_mode: trajectory.policy.monitor.mode(),
        cancelled: trajectory.cancelled,
    }
}

pub fn summarize(trajectories: &[Trajectory]) -> EvaluationReport {
    let learners: Vec<LearnerSummary> = trajectories.iter().map(summarize_one).collect();
    let mean_total_reward = if learners.is_empty() {
        0.0
    } else {
        learners.iter().map(|l| l.total_reward).sum::<f64>() / learners.len() as f64
    };
    EvaluationReport {
        total_rejected: learners.iter().map(|l| l.rejected).sum(),
        converged_learners: learners
            .iter()
            .filter(|l| l.final_mode == EngineMode::Converged)
            .count(),
        mean_total_reward,
        learners,
    }
}

/// A learner left out of the report because its run failed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedLearner {
    pub learner_id: String,
    pub kind: String,
    pub reason: String,
    pub steps_completed: usize,
}

impl From<&LearnerFailure> for FailedLearner {
    fn from(failure: &LearnerFailure) -> Self {
        Self {
            learner_id: failure.learner_id.clone(),
            kind: failure.error.kind().to_string(),
            reason: failure.error.to_string(),
            steps_completed: failure.partial.as_ref().map_or(0, |t| t.steps.len()),
        }
    }
}

/// Everything one run produced, as written to the results file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResults {
    pub generated_at: DateTime<Utc>,
    pub report: EvaluationReport,
    pub curves: Vec<LearningCurve>,
    pub trajectories: Vec<Trajectory>,
    #[serde(default)]
    pub failures: Vec<FailedLearner>,
}

impl SimulationResults {
    pub fn new(trajectories: Vec<Trajectory>) -> Self {
        Self {
            generated_at: Utc::now(),
            report: summarize(&trajectories),
            curves: trajectories.iter().map(learning_curve).collect(),
            trajectories,
            failures: Vec::new(),
        }
    }

    pub fn with_failures(mut self, failures: &[LearnerFailure]) -> Self {
        self.failures = failures.iter().map(FailedLearner::from).collect();
        self
    }

    pub async fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        info!(
            path = %path.display(),
            learners = self.trajectories.len(),
            failed = self.failures.len(),
            "Simulation results written"
        );
        Ok(())
    }
}
