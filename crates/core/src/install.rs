//! Shared-resource (model) management wire types and the two-phase
//! install progress model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::progress::clamp_percent;
use crate::types::{ClientId, RepoId, TaskId};

// ---------------------------------------------------------------------------
// Container constants
// ---------------------------------------------------------------------------

/// Group of analysis feature models (genre classifier, ...).
pub const CONTAINER_FEATURE_MODELS: &str = "feature_models";
/// Group of stem separation models.
pub const CONTAINER_SEPARATION_MODELS: &str = "separation_models";

/// All groups returned by the models status endpoint.
pub const CONTAINERS: &[&str] = &[CONTAINER_FEATURE_MODELS, CONTAINER_SEPARATION_MODELS];

// ---------------------------------------------------------------------------
// manage_model
// ---------------------------------------------------------------------------

/// Body of `POST /api/manage_model`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ManageRequest {
    Install {
        repo_id: RepoId,
        #[serde(skip_serializing_if = "Option::is_none")]
        ui_container_id: Option<String>,
    },
    Delete {
        deletion_path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ui_container_id: Option<String>,
    },
}

/// Outcome reported by the server for a manage request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManageStatus {
    /// Another install holds the global lock; nothing changed.
    Waiting,
    /// The install was accepted and is now in flight.
    Running,
    /// The delete was applied.
    Ok,
    /// The server could not apply the action.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManageResponse {
    pub status: ManageStatus,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// models_status
// ---------------------------------------------------------------------------

/// Server view of one installable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub installed: bool,
    #[serde(default)]
    pub size: String,
    pub repo_id: RepoId,
    /// Manifest path used by the delete action; empty when not installed.
    #[serde(default)]
    pub deletion_path: String,
    #[serde(default)]
    pub installing: bool,
    #[serde(default)]
    pub installer_client_id: Option<ClientId>,
}

/// Full response of `GET /api/models_status`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelsStatus {
    #[serde(default)]
    pub feature_models: BTreeMap<RepoId, ModelEntry>,
    #[serde(default)]
    pub separation_models: BTreeMap<RepoId, ModelEntry>,
    #[serde(default)]
    pub host_ai_models_path: Option<String>,
    #[serde(default)]
    pub host_processing_cache_path: Option<String>,
}

impl ModelsStatus {
    /// Entries of one container group, if the name is known.
    pub fn container(&self, name: &str) -> Option<&BTreeMap<RepoId, ModelEntry>> {
        match name {
            CONTAINER_FEATURE_MODELS => Some(&self.feature_models),
            CONTAINER_SEPARATION_MODELS => Some(&self.separation_models),
            _ => None,
        }
    }

    /// Every entry paired with the container it belongs to.
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &ModelEntry)> {
        self.feature_models
            .values()
            .map(|e| (CONTAINER_FEATURE_MODELS, e))
            .chain(
                self.separation_models
                    .values()
                    .map(|e| (CONTAINER_SEPARATION_MODELS, e)),
            )
    }

    pub fn find(&self, repo_id: &str) -> Option<&ModelEntry> {
        self.feature_models
            .get(repo_id)
            .or_else(|| self.separation_models.get(repo_id))
    }
}

// ---------------------------------------------------------------------------
// Two-phase progress
// ---------------------------------------------------------------------------

/// Phase of an install as shown to its actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    Download,
    Verification,
}

/// Download bar followed by a verification bar.
///
/// The server sends one `progress` number and a step message; the phase
/// is inferred from the message. Verification only starts once the
/// download bar has been shown complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwoPhaseProgress {
    pub phase: InstallPhase,
    pub download: f64,
    pub verification: f64,
    pub message: String,
}

impl Default for TwoPhaseProgress {
    fn default() -> Self {
        Self {
            phase: InstallPhase::Download,
            download: 0.0,
            verification: 0.0,
            message: String::new(),
        }
    }
}

impl TwoPhaseProgress {
    /// `true` when `message` announces the verification phase.
    pub fn is_verification_message(message: &str) -> bool {
        message.to_lowercase().contains("verif")
    }

    pub fn apply(&mut self, progress: f64, message: &str) {
        let progress = clamp_percent(progress);
        self.message = message.to_string();

        if self.phase == InstallPhase::Download && Self::is_verification_message(message) {
            self.download = 100.0;
            self.phase = InstallPhase::Verification;
        }

        match self.phase {
            InstallPhase::Download => self.download = self.download.max(progress),
            InstallPhase::Verification => self.verification = self.verification.max(progress),
        }
    }

    /// Combined percentage with both phases weighted equally.
    pub fn overall(&self) -> f64 {
        (self.download + self.verification) / 2.0
    }
}
