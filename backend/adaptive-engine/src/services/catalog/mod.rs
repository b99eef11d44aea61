// ============================================
// Activity Catalog
// ============================================
//
// The engine only asks the catalog for the candidate set. Eligibility:
// an activity is eligible once every prerequisite tag is covered by the
// skill tags of activities the learner has completed. Completed activities
// stay eligible so mastered material can be reinforced.

use crate::error::{EngineError, Result};
use crate::models::{Activity, Difficulty};
use std::collections::{HashMap, HashSet};

#[cfg_attr(test, mockall::automock)]
pub trait ActivityCatalog: Send + Sync {
    fn activities(&self) -> Vec<Activity>;

    fn get(&self, activity_id: &str) -> Option<Activity>;

    /// Candidate set given the ids of activities already completed
    fn eligible(&self, completed: &HashSet<String>) -> Vec<Activity>;
}

pub const SHAPES_MODULE: &str = "shapes";
pub const ACTIONS_MODULE: &str = "actions";

const SHAPES_LESSONS: [&str; 8] = [
    "Recognising Circles",
    "Introducing Squares",
    "Getting Comfortable with Triangles",
    "Identifying Complex Shapes",
    "Shape Differentiation",
    "Advanced Shape Identification",
    "Mastering Shape Recognition",
    "The Ultimate Shape Challenge",
];

const ACTIONS_LESSONS: [&str; 8] = [
    "Basic Actions",
    "Intermediate Actions",
    "Two-Step Actions",
    "Coordinated Actions",
    "Complex Multi-Step Actions",
    "Action Sequences",
    "Mastering Motor Skills",
    "Advanced Action Interpretation",
];

/// One lesson per difficulty; lesson k requires the skill taught by lesson k-1
fn module_ladder(module: &str, names: &[&str; 8]) -> Vec<Activity> {
    Difficulty::ALL
        .iter()
        .zip(names.iter())
        .map(|(difficulty, name)| {
            let level = difficulty.level();
            let skill = format!("{}-{}", module, level);
            let activity = Activity::new(skill.clone(), *difficulty)
                .with_module(module)
                .with_name(*name)
                .with_skills(&[skill.as_str()]);
            if level > 1 {
                let prerequisite = format!("{}-{}", module, level - 1);
                activity.with_prerequisites(&[prerequisite.as_str()])
            } else {
                activity
            }
        })
        .collect()
}

/// Catalog held in memory
#[derive(Debug, Clone)]
pub struct InMemoryCatalog {
    activities: Vec<Activity>,
    index: HashMap<String, usize>,
}

impl InMemoryCatalog {
    pub fn new(mut activities: Vec<Activity>) -> Result<Self> {
        activities.sort_by(|a, b| {
            a.module
                .cmp(&b.module)
                .then_with(|| a.difficulty.cmp(&b.difficulty))
                .then_with(|| a.id.cmp(&b.id))
        });
        let mut index = HashMap::with_capacity(activities.len());
        for (position, activity) in activities.iter().enumerate() {
            if index.insert(activity.id.clone(), position).is_some() {
                return Err(EngineError::Configuration(format!(
                    "duplicate activity id `{}` in catalog",
                    activity.id
                )));
            }
        }
        Ok(Self { activities, index })
    }

    pub fn shapes() -> Self {
        Self::from_ladder(module_ladder(SHAPES_MODULE, &SHAPES_LESSONS))
    }

    pub fn actions() -> Self {
        Self::from_ladder(module_ladder(ACTIONS_MODULE, &ACTIONS_LESSONS))
    }

    /// Both built-in modules
    pub fn builtin() -> Self {
        let mut activities = module_ladder(SHAPES_MODULE, &SHAPES_LESSONS);
        activities.extend(module_ladder(ACTIONS_MODULE, &ACTIONS_LESSONS));
        Self::from_ladder(activities)
    }

    /// Built-in module by name
    pub fn module(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            SHAPES_MODULE => Ok(Self::shapes()),
            ACTIONS_MODULE => Ok(Self::actions()),
            "all" => Ok(Self::builtin()),
            other => Err(EngineError::Configuration(format!(
                "unknown module `{}`",
                other
            ))),
        }
    }

    // Generated ladders have unique ids
    fn from_ladder(activities: Vec<Activity>) -> Self {
        let index = activities
            .iter()
            .enumerate()
            .map(|(position, activity)| (activity.id.clone(), position))
            .collect();
        Self { activities, index }
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

impl ActivityCatalog for InMemoryCatalog {
    fn activities(&self) -> Vec<Activity> {
        self.activities.clone()
    }

    fn get(&self, activity_id: &str) -> Option<Activity> {
        self.index
            .get(activity_id)
            .map(|position| self.activities[*position].clone())
    }

    fn eligible(&self, completed: &HashSet<String>) -> Vec<Activity> {
        let skills: HashSet<&str> = completed
            .iter()
            .filter_map(|id| self.index.get(id))
            .flat_map(|position| self.activities[*position].skill_tags.iter())
            .map(String::as_str)
            .collect();

        self.activities
            .iter()
            .filter(|activity| {
                activity
                    .prerequisite_tags
                    .iter()
                    .all(|tag| skills.contains(tag.as_str()))
            })
            .cloned()
            .collect()
    }
}
