// ============================================
// Session Persistence
// ============================================
//
// Profiles, policy state and catalog progress are saved as one versioned
// JSON document so a session can be resumed. A snapshot that cannot be decoded is fatal
// (PolicyStateCorrupt) unless `allow_reset_on_corrupt` is set, in which case
// the run starts from defaults with a warning.

use crate::error::{EngineError, Result};
use crate::services::policy::PolicySnapshot;
use crate::services::profile_store::{LearnerProfile, ProfileStore};
use crate::services::simulation::{LearnerProgress, Trajectory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub profiles: Vec<LearnerProfile>,
    pub policies: Vec<PolicySnapshot>,
    #[serde(default)]
    pub progress: Vec<LearnerProgress>,
}

/// What `SessionSnapshot::apply` hands back for the harness
#[derive(Debug, Clone, Default)]
pub struct Restored {
    pub policies: Vec<PolicySnapshot>,
    pub progress: Vec<LearnerProgress>,
}

impl SessionSnapshot {
    pub fn new(
        profiles: Vec<LearnerProfile>,
        policies: Vec<PolicySnapshot>,
        progress: Vec<LearnerProgress>,
    ) -> Self {
        Self {
            schema_version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            profiles,
            policies,
            progress,
        }
    }

    /// Current profiles plus the final policy state and progress of each
    /// trajectory
    pub fn capture<'a>(
        store: &ProfileStore,
        trajectories: impl IntoIterator<Item = &'a Trajectory>,
    ) -> Self {
        let (policies, progress) = trajectories
            .into_iter()
            .map(|t| (t.policy.clone(), t.progress.clone()))
            .unzip();
        Self::new(store.snapshot_all(), policies, progress)
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.schema_version != SNAPSHOT_VERSION {
            return Err(format!(
                "unsupported snapshot version {} (expected {})",
                self.schema_version, SNAPSHOT_VERSION
            ));
        }
        for profile in &self.profiles {
            profile
                .check_invariants()
                .map_err(|reason| format!("profile {}: {}", profile.learner_id, reason))?;
        }
        Ok(())
    }

    /// Loads profiles into `store` and hands back the per-learner state
    pub fn apply(self, store: &ProfileStore) -> Result<Restored> {
        store.restore(self.profiles)?;
        Ok(Restored {
            policies: self.policies,
            progress: self.progress,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    allow_reset_on_corrupt: bool,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>, allow_reset_on_corrupt: bool) -> Self {
        Self {
            path: path.into(),
            allow_reset_on_corrupt,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes via a temporary file so a crash never leaves half a snapshot
    pub async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        info!(
            path = %self.path.display(),
            profiles = snapshot.profiles.len(),
            policies = snapshot.policies.len(),
            "Session snapshot saved"
        );
        Ok(())
    }

    /// `Ok(None)` when there is nothing to resume from
    pub async fn load(&self) -> Result<Option<SessionSnapshot>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No snapshot found, starting fresh");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let decoded = serde_json::from_slice::<SessionSnapshot>(&raw)
            .map_err(|e| e.to_string())
            .and_then(|snapshot| snapshot.check().map(|_| snapshot));

        match decoded {
            Ok(snapshot) => {
                info!(
                    path = %self.path.display(),
                    profiles = snapshot.profiles.len(),
                    saved_at = %snapshot.saved_at,
                    "Session snapshot loaded"
                );
                Ok(Some(snapshot))
            }
            Err(reason) if self.allow_reset_on_corrupt => {
                warn!(
                    path = %self.path.display(),
                    reason = %reason,
                    "Snapshot corrupt, resetting to defaults"
                );
                Ok(None)
            }
            Err(reason) => Err(EngineError::PolicyStateCorrupt(format!(
                "{}: {}",
                self.path.display(),
                reason
            ))),
        }
    }
}
