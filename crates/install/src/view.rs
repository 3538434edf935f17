//! Per-resource projections and the events a renderer consumes.

use serde::Serialize;

use solasola_core::install::{ModelEntry, TwoPhaseProgress};
use solasola_core::types::{RepoId, TaskId};

/// Notice shown on a resource while another tab installs it.
pub const SYSTEM_BUSY_NOTICE: &str = "Another installation is in progress.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResourceState {
    NotInstalled,
    Installed,
    /// This tab is the actor; its progress renderer is running.
    Installing {
        task_id: Option<TaskId>,
        progress: TwoPhaseProgress,
    },
    /// Another tab is the actor; the resource is read-only here.
    SystemBusy { notice: String },
}

impl ResourceState {
    pub fn is_installing(&self) -> bool {
        matches!(self, ResourceState::Installing { .. })
    }
}

/// What a tab renders for one resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceView {
    pub repo_id: RepoId,
    pub name: String,
    pub container: String,
    pub size: String,
    pub deletion_path: String,
    pub state: ResourceState,
    /// Action buttons disabled until the next authoritative update.
    pub action_pending: bool,
}

impl ResourceView {
    /// Project a server entry, keeping the actor's running renderer.
    ///
    /// Every field is overwritten from `entry`; only an install this tab
    /// is driving keeps its local progress.
    pub fn reconcile(
        container: &str,
        entry: &ModelEntry,
        previous: Option<&ResourceView>,
        own_client_id: &str,
    ) -> Self {
        let state = if entry.installing {
            let is_actor = entry.installer_client_id.as_deref() == Some(own_client_id);
            match previous.map(|v| &v.state) {
                Some(running @ ResourceState::Installing { .. }) if is_actor => running.clone(),
                _ if is_actor => ResourceState::Installing {
                    task_id: None,
                    progress: TwoPhaseProgress::default(),
                },
                Some(busy @ ResourceState::SystemBusy { .. }) => busy.clone(),
                _ => ResourceState::SystemBusy {
                    notice: SYSTEM_BUSY_NOTICE.to_string(),
                },
            }
        } else if entry.installed {
            ResourceState::Installed
        } else {
            ResourceState::NotInstalled
        };

        Self {
            repo_id: entry.repo_id.clone(),
            name: entry.name.clone(),
            container: container.to_string(),
            size: entry.size.clone(),
            deletion_path: entry.deletion_path.clone(),
            state,
            action_pending: false,
        }
    }

    /// Server-side resting state after the renderer stops.
    pub fn settle(&mut self) {
        self.state = if self.deletion_path.is_empty() {
            ResourceState::NotInstalled
        } else {
            ResourceState::Installed
        };
        self.action_pending = false;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstallViewEvent {
    /// The whole list was re-fetched; re-render everything.
    Reloaded { views: Vec<ResourceView> },
    /// One resource changed in place.
    Updated { view: ResourceView },
    /// Actor-only progress for a running install.
    Progress {
        repo_id: RepoId,
        progress: TwoPhaseProgress,
    },
}
