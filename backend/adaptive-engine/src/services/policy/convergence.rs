use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineMode {
    Exploring,
    Converged,
}

impl EngineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineMode::Exploring => "EXPLORING",
            EngineMode::Converged => "CONVERGED",
        }
    }
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvergenceConfig {
    /// Learning steps in the rolling windows
    pub window: usize,
    /// Largest |value change| over a full window that still counts as stable
    pub stability_epsilon: f64,
    /// Drop of the rolling reward mean below the converged baseline that
    /// counts as drift
    pub drift_threshold: f64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            window: 10,
            stability_epsilon: 0.01,
            drift_threshold: 0.3,
        }
    }
}

impl ConvergenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(EngineError::Configuration(
                "convergence window must be >= 1".to_string(),
            ));
        }
        if self.stability_epsilon <= 0.0 || self.drift_threshold <= 0.0 {
            return Err(EngineError::Configuration(
                "stability_epsilon and drift_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModeTransition {
    Converged { baseline: f64 },
    Drifted { baseline: f64, recent: f64 },
}

/// Tracks value stability and reward level to drive the mode switch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvergenceMonitor {
    config: ConvergenceConfig,
    mode: EngineMode,
    deltas: VecDeque<f64>,
    rewards: VecDeque<f64>,
    /// Reward level at the moment of convergence
    baseline: Option<f64>,
}

fn mean(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn push_bounded(window: &mut VecDeque<f64>, value: f64, capacity: usize) {
    window.push_back(value);
    while window.len() > capacity {
        window.pop_front();
    }
}

impl ConvergenceMonitor {
    pub fn new(config: ConvergenceConfig) -> Self {
        Self {
            config,
            mode: EngineMode::Exploring,
            deltas: VecDeque::new(),
            rewards: VecDeque::new(),
            baseline: None,
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    pub fn recent_reward_mean(&self) -> f64 {
        mean(&self.rewards)
    }

    /// Feed one learning step: the value change it caused and its reward
    pub fn record(&mut self, value_delta: f64, reward: f64) -> Option<ModeTransition> {
        let window = self.config.window;
        push_bounded(&mut self.deltas, value_delta.abs(), window);
        push_bounded(&mut self.rewards, reward, window);

        match self.mode {
            EngineMode::Exploring => {
                let stable = self.deltas.len() == window
                    && self
                        .deltas
                        .iter()
                        .all(|delta| *delta < self.config.stability_epsilon);
                if stable {
                    let baseline = mean(&self.rewards);
                    self.mode = EngineMode::Converged;
                    self.baseline = Some(baseline);
                    return Some(ModeTransition::Converged { baseline });
                }
                None
            }
            EngineMode::Converged => {
                let baseline = self.baseline.unwrap_or_else(|| mean(&self.rewards));
                let recent = mean(&self.rewards);
                if self.rewards.len() == window && recent < baseline - self.config.drift_threshold {
                    self.mode = EngineMode::Exploring;
                    self.baseline = None;
                    self.deltas.clear();
                    self.rewards.clear();
                    return Some(ModeTransition::Drifted { baseline, recent });
                }
                None
            }
        }
    }

    /// Rebinds a deserialized monitor to the active configuration
    pub(crate) fn with_config(mut self, config: ConvergenceConfig) -> Self {
        self.config = config;
        self
    }

    /// Checks a deserialized monitor against its configuration
    pub(crate) fn check(&self) -> std::result::Result<(), String> {
        if self.deltas.len() > self.config.window || self.rewards.len() > self.config.window {
            return Err("convergence window overflow".to_string());
        }
        if self
            .deltas
            .iter()
            .chain(self.rewards.iter())
            .any(|v| !v.is_finite())
        {
            return Err("non-finite value in convergence window".to_string());
        }
        if self.mode == EngineMode::Converged && self.baseline.is_none() {
            return Err("converged without a reward baseline".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(window: usize) -> ConvergenceMonitor {
        ConvergenceMonitor::new(ConvergenceConfig {
            window,
            ..Default::default()
        })
    }

    #[test]
    fn test_starts_exploring() {
        assert_eq!(monitor(3).mode(), EngineMode::Exploring);
    }

    #[test]
    fn test_converges_after_full_stable_window() {
        let mut monitor = monitor(3);
        assert_eq!(monitor.record(0.001, 0.5), None);
        assert_eq!(monitor.record(0.001, 0.5), None);
        assert_eq!(
            monitor.record(0.001, 0.5),
            Some(ModeTransition::Converged { baseline: 0.5 })
        );
        assert_eq!(monitor.mode(), EngineMode::Converged);
    }

    #[test]
    fn test_large_change_blocks_convergence() {
        let mut monitor = monitor(3);
        monitor.record(0.2, 0.5);
        monitor.record(0.001, 0.5);
        assert_eq!(monitor.record(0.001, 0.5), None);
        assert_eq!(monitor.mode(), EngineMode::Exploring);
    }

    #[test]
    fn test_reward_drop_returns_to_exploring() {
        let mut monitor = monitor(3);
        for _ in 0..3 {
            monitor.record(0.0, 0.6);
        }
        assert_eq!(monitor.mode(), EngineMode::Converged);

        // A single mild dip is tolerated
        assert_eq!(monitor.record(0.0, 0.4), None);
        assert_eq!(monitor.mode(), EngineMode::Converged);

        let transition = monitor.record(0.0, -0.8);
        assert!(matches!(transition, Some(ModeTransition::Drifted { .. })));
        assert_eq!(monitor.mode(), EngineMode::Exploring);
        assert_eq!(monitor.baseline(), None);
    }

    #[test]
    fn test_check_rejects_inconsistent_state() {
        let mut monitor = monitor(3);
        assert!(monitor.check().is_ok());
        monitor.mode = EngineMode::Converged;
        assert!(monitor.check().is_err());
    }
}
