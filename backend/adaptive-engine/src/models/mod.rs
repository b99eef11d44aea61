use serde::{Deserialize, Serialize};
use std::fmt;

/// Qualitative difficulty ladder, ordered from easiest to hardest
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Difficulty {
    VeryEasy,
    Easy,
    Medium,
    Hard,
    VeryHard,
    Expert,
    Master,
    Grandmaster,
}

impl Difficulty {
    pub const ALL: [Difficulty; 8] = [
        Difficulty::VeryEasy,
        Difficulty::Easy,
        Difficulty::Medium,
        Difficulty::Hard,
        Difficulty::VeryHard,
        Difficulty::Expert,
        Difficulty::Master,
        Difficulty::Grandmaster,
    ];

    /// 1-based level (VeryEasy = 1, Grandmaster = 8)
    pub fn level(&self) -> u8 {
        match self {
            Difficulty::VeryEasy => 1,
            Difficulty::Easy => 2,
            Difficulty::Medium => 3,
            Difficulty::Hard => 4,
            Difficulty::VeryHard => 5,
            Difficulty::Expert => 6,
            Difficulty::Master => 7,
            Difficulty::Grandmaster => 8,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1..=8 => Some(Self::ALL[(level - 1) as usize]),
            _ => None,
        }
    }

    /// Level mapped onto [0, 1]
    pub fn normalized(&self) -> f64 {
        (self.level() - 1) as f64 / (Self::ALL.len() - 1) as f64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::VeryEasy => "VeryEasy",
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
            Difficulty::VeryHard => "VeryHard",
            Difficulty::Expert => "Expert",
            Difficulty::Master => "Master",
            Difficulty::Grandmaster => "Grandmaster",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static catalog entry. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: String,
    pub name: String,
    pub module: String,
    pub difficulty: Difficulty,
    pub skill_tags: Vec<String>,
    pub prerequisite_tags: Vec<String>,
}

impl Activity {
    pub fn new(id: impl Into<String>, difficulty: Difficulty) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            module: String::new(),
            difficulty,
            skill_tags: Vec::new(),
            prerequisite_tags: Vec::new(),
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_skills(mut self, skills: &[&str]) -> Self {
        self.skill_tags = skills.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_prerequisites(mut self, prerequisites: &[&str]) -> Self {
        self.prerequisite_tags = prerequisites.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Decision-point context that is not part of the learner profile
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SessionContext {
    /// Steps already taken in this session
    pub step_index: u32,
    /// Planned session length in steps
    pub session_horizon: u32,
}

impl SessionContext {
    pub fn new(step_index: u32, session_horizon: u32) -> Self {
        Self {
            step_index,
            session_horizon,
        }
    }

    /// Time-of-session in [0, 1]
    pub fn progress(&self) -> f64 {
        if self.session_horizon == 0 {
            return 0.0;
        }
        (self.step_index as f64 / self.session_horizon as f64).clamp(0.0, 1.0)
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(0, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difficulty_levels_round_trip() {
        for difficulty in Difficulty::ALL {
            assert_eq!(Difficulty::from_level(difficulty.level()), Some(difficulty));
        }
        assert_eq!(Difficulty::from_level(0), None);
        assert_eq!(Difficulty::from_level(9), None);
    }

    #[test]
    fn test_difficulty_normalized_bounds() {
        assert_eq!(Difficulty::VeryEasy.normalized(), 0.0);
        assert_eq!(Difficulty::Grandmaster.normalized(), 1.0);
        assert!(Difficulty::Easy < Difficulty::Hard);
    }

    #[test]
    fn test_session_progress() {
        assert_eq!(SessionContext::new(50, 100).progress(), 0.5);
        assert_eq!(SessionContext::new(500, 100).progress(), 1.0);
        assert_eq!(SessionContext::new(3, 0).progress(), 0.0);
    }
}
