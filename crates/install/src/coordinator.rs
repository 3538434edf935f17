//! Install coordinator: optimistic actions plus broadcast reconciliation.
//!
//! Local transitions (disabled buttons, the "installing" state) are
//! provisional. `status_update`, `progress_update` and `refresh_all`
//! broadcasts always overwrite them, and a lagged listener re-derives
//! everything from a full reload.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};

use solasola_client::{ModelBackend, TaskBackend};
use solasola_core::install::{ManageRequest, ManageStatus, ModelsStatus, TwoPhaseProgress};
use solasola_core::task::{LogTarget, Severity, TaskStatus};
use solasola_core::types::{ClientId, RepoId};
use solasola_events::{Action, Envelope, Payload};
use solasola_notifications::{NotificationQueue, ToastRequest};
use solasola_session::TabContext;

use crate::error::InstallError;
use crate::view::{InstallViewEvent, ResourceState, ResourceView};

/// Broadcast channel capacity for view events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct InstallCoordinator {
    models: Arc<dyn ModelBackend>,
    tasks: Arc<dyn TaskBackend>,
    client_id: ClientId,
    notifications: NotificationQueue,
    views: RwLock<HashMap<RepoId, ResourceView>>,
    event_tx: broadcast::Sender<InstallViewEvent>,
}

impl InstallCoordinator {
    pub fn new(
        models: Arc<dyn ModelBackend>,
        tasks: Arc<dyn TaskBackend>,
        context: &TabContext,
        notifications: NotificationQueue,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            models,
            tasks,
            client_id: context.client_id(),
            notifications,
            views: RwLock::new(HashMap::new()),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstallViewEvent> {
        self.event_tx.subscribe()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// All views ordered by container, then repo id.
    pub async fn views(&self) -> Vec<ResourceView> {
        let mut views: Vec<ResourceView> = self.views.read().await.values().cloned().collect();
        views.sort_by(|a, b| (&a.container, &a.repo_id).cmp(&(&b.container, &b.repo_id)));
        views
    }

    pub async fn view(&self, repo_id: &str) -> Option<ResourceView> {
        self.views.read().await.get(repo_id).cloned()
    }

    /// Initial list load. Installs already in flight are re-attached:
    /// ours as a running renderer, anyone else's as system busy.
    pub async fn load(&self) -> Result<(), InstallError> {
        let status = self.models.models_status().await?;
        self.rebuild(&status).await;
        Ok(())
    }

    /// Re-fetch the list. `force` asks the server to rescan first.
    pub async fn refresh(&self, force: bool) -> Result<(), InstallError> {
        let status = if force {
            self.models.refresh_models_status().await?
        } else {
            self.models.models_status().await?
        };
        self.rebuild(&status).await;
        Ok(())
    }

    /// Ask the server to install `repo_id`.
    ///
    /// [`ManageStatus::Waiting`] means another install holds the lock: a
    /// warning is shown and nothing changes locally.
    pub async fn install(&self, repo_id: &str) -> Result<ManageStatus, InstallError> {
        let container = {
            let mut views = self.views.write().await;
            let view = views
                .get_mut(repo_id)
                .ok_or_else(|| InstallError::UnknownResource(repo_id.to_string()))?;
            if view.state.is_installing() {
                return Err(InstallError::AlreadyInstalling(repo_id.to_string()));
            }
            view.action_pending = true;
            self.publish_view(view);
            view.container.clone()
        };

        let request = ManageRequest::Install {
            repo_id: repo_id.to_string(),
            ui_container_id: Some(container),
        };
        let response = match self.models.manage_model(&self.client_id, &request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(repo_id, error = %e, "Install request failed");
                self.release(repo_id).await;
                self.toast(format!("Install failed: {e}"), Severity::Error);
                return Err(e.into());
            }
        };

        match response.status {
            ManageStatus::Running => {
                tracing::info!(repo_id, task_id = ?response.task_id, "Install started");
                let task_id = response.task_id.clone();
                self.update(repo_id, |view| {
                    // Broadcasts may have overtaken the reply; keep their progress.
                    if let ResourceState::Installing { task_id: known, .. } = &mut view.state {
                        if known.is_none() {
                            *known = task_id;
                        }
                    } else {
                        view.state = ResourceState::Installing {
                            task_id,
                            progress: TwoPhaseProgress::default(),
                        };
                    }
                    view.action_pending = false;
                })
                .await;
            }
            ManageStatus::Waiting => {
                tracing::info!(repo_id, "Install refused, another install is running");
                self.release(repo_id).await;
                self.toast(
                    response
                        .message
                        .unwrap_or_else(|| "Another installation is already in progress.".into()),
                    Severity::Warning,
                );
            }
            ManageStatus::Ok | ManageStatus::Error => {
                self.release(repo_id).await;
                let message = response
                    .message
                    .unwrap_or_else(|| "The server could not start the installation.".into());
                self.toast(message.clone(), Severity::Error);
                return Err(InstallError::Refused(message));
            }
        }

        Ok(response.status)
    }

    /// Ask the server to delete `repo_id`.
    ///
    /// The action is disabled immediately; the final state arrives with the
    /// server's `refresh_all` broadcast.
    pub async fn delete(&self, repo_id: &str) -> Result<ManageStatus, InstallError> {
        let request = {
            let mut views = self.views.write().await;
            let view = views
                .get_mut(repo_id)
                .ok_or_else(|| InstallError::UnknownResource(repo_id.to_string()))?;
            if view.deletion_path.is_empty() {
                return Err(InstallError::NotInstalled(repo_id.to_string()));
            }
            view.action_pending = true;
            self.publish_view(view);
            ManageRequest::Delete {
                deletion_path: view.deletion_path.clone(),
                ui_container_id: Some(view.container.clone()),
            }
        };

        let response = match self.models.manage_model(&self.client_id, &request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(repo_id, error = %e, "Delete request failed");
                self.release(repo_id).await;
                self.toast(format!("Delete failed: {e}"), Severity::Error);
                return Err(e.into());
            }
        };

        match response.status {
            ManageStatus::Ok => {
                tracing::info!(repo_id, "Model deleted");
                if let Some(message) = response.message.clone() {
                    self.toast(message, Severity::Success);
                }
            }
            ManageStatus::Waiting => {
                self.release(repo_id).await;
                self.toast(
                    response
                        .message
                        .unwrap_or_else(|| "Another task is in progress.".into()),
                    Severity::Warning,
                );
            }
            ManageStatus::Running | ManageStatus::Error => {
                self.release(repo_id).await;
                let message = response
                    .message
                    .unwrap_or_else(|| "Failed to delete the model on the server.".into());
                self.toast(message.clone(), Severity::Error);
                return Err(InstallError::Refused(message));
            }
        }

        Ok(response.status)
    }

    /// Cancel the install this tab started for `repo_id`.
    pub async fn cancel(&self, repo_id: &str) -> Result<(), InstallError> {
        let task_id = match self.view(repo_id).await.map(|v| v.state) {
            Some(ResourceState::Installing {
                task_id: Some(task_id),
                ..
            }) => task_id,
            _ => return Err(InstallError::NotActor(repo_id.to_string())),
        };

        self.update(repo_id, |view| view.action_pending = true).await;
        if let Err(e) = self.tasks.cancel(&task_id).await {
            tracing::warn!(repo_id, task_id = %task_id, error = %e, "Cancel request failed");
            self.release(repo_id).await;
            self.toast(format!("Could not cancel: {e}"), Severity::Error);
            return Err(e.into());
        }
        tracing::info!(repo_id, task_id = %task_id, "Install cancellation requested");
        Ok(())
    }

    /// Apply one push-stream envelope.
    pub async fn handle_envelope(&self, envelope: &Envelope) {
        let payload = &envelope.payload;
        match envelope.action {
            Action::StatusUpdate => self.on_status_update(payload).await,
            Action::ProgressUpdate => self.on_progress_update(payload).await,
            Action::RefreshAll => self.on_refresh_all(payload).await,
            Action::LogUpdate | Action::Other => {}
        }
    }

    /// Consume envelopes until the channel closes.
    pub async fn run(&self, mut rx: broadcast::Receiver<Envelope>) {
        loop {
            match rx.recv().await {
                Ok(envelope) => self.handle_envelope(&envelope).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Install listener lagged, reloading");
                    if let Err(e) = self.refresh(false).await {
                        tracing::warn!(error = %e, "Reload after lag failed");
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    // ---- broadcast handlers ----

    async fn on_status_update(&self, payload: &Payload) {
        let Some(repo_id) = payload.repo_id() else {
            return;
        };
        let is_actor = payload.is_from(&self.client_id);

        match payload.status {
            Some(TaskStatus::Running | TaskStatus::Pending) => {
                if is_actor {
                    let task_id = payload.task_id.clone();
                    self.update(repo_id, |view| {
                        if let ResourceState::Installing { task_id: known, .. } = &mut view.state {
                            if known.is_none() {
                                *known = task_id;
                            }
                        } else {
                            view.state = ResourceState::Installing {
                                task_id,
                                progress: TwoPhaseProgress::default(),
                            };
                        }
                    })
                    .await;
                } else {
                    let notice = non_empty(payload.message())
                        .map(|m| format!("Another tab is installing this model. {m}"))
                        .unwrap_or_else(|| crate::view::SYSTEM_BUSY_NOTICE.to_string());
                    self.update(repo_id, |view| {
                        view.state = ResourceState::SystemBusy {
                            notice: notice.clone(),
                        };
                        view.action_pending = false;
                    })
                    .await;
                    self.notifications.enqueue(
                        ToastRequest::new(notice, Severity::Info).with_target(LogTarget::Log),
                    );
                }
            }
            Some(status @ (TaskStatus::Failed | TaskStatus::Cancelled)) => {
                tracing::info!(repo_id, status = status.as_str(), is_actor, "Install stopped");
                self.update(repo_id, ResourceView::settle).await;
                if is_actor {
                    let message = non_empty(payload.message())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Installation {}", status.as_str()));
                    self.toast(message, Severity::Error);
                }
            }
            Some(TaskStatus::Completed) | None => {}
        }
    }

    async fn on_progress_update(&self, payload: &Payload) {
        if !payload.is_from(&self.client_id) {
            return;
        }
        let Some(repo_id) = payload.repo_id() else {
            return;
        };

        let progress = {
            let mut views = self.views.write().await;
            let Some(view) = views.get_mut(repo_id) else {
                return;
            };
            if !view.state.is_installing() {
                view.state = ResourceState::Installing {
                    task_id: payload.task_id.clone(),
                    progress: TwoPhaseProgress::default(),
                };
            }
            let ResourceState::Installing { task_id, progress } = &mut view.state else {
                return;
            };
            if task_id.is_none() {
                *task_id = payload.task_id.clone();
            }
            progress.apply(payload.progress.unwrap_or_default(), payload.message());
            progress.clone()
        };

        let _ = self.event_tx.send(InstallViewEvent::Progress {
            repo_id: repo_id.to_string(),
            progress,
        });
    }

    async fn on_refresh_all(&self, payload: &Payload) {
        let status = match self.models.models_status().await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to re-fetch models after refresh_all");
                return;
            }
        };

        match payload.ui_container_id() {
            Some(container) => self.reconcile_container(&status, container).await,
            None => self.rebuild(&status).await,
        }
    }

    // ---- private helpers ----

    /// Replace every view from a fresh server listing.
    async fn rebuild(&self, status: &ModelsStatus) {
        let count = {
            let mut views = self.views.write().await;
            let rebuilt: HashMap<RepoId, ResourceView> = status
                .entries()
                .map(|(container, entry)| {
                    let view = ResourceView::reconcile(
                        container,
                        entry,
                        views.get(&entry.repo_id),
                        &self.client_id,
                    );
                    (entry.repo_id.clone(), view)
                })
                .collect();
            *views = rebuilt;
            views.len()
        };
        tracing::debug!(count, "Model list reloaded");

        let views = self.views().await;
        let _ = self.event_tx.send(InstallViewEvent::Reloaded { views });
    }

    /// Update already-rendered views of one container in place.
    async fn reconcile_container(&self, status: &ModelsStatus, container: &str) {
        let Some(entries) = status.container(container) else {
            tracing::debug!(container, "Unknown container in refresh_all, reloading");
            self.rebuild(status).await;
            return;
        };

        let mut views = self.views.write().await;
        for entry in entries.values() {
            let view = ResourceView::reconcile(
                container,
                entry,
                views.get(&entry.repo_id),
                &self.client_id,
            );
            if views.get(&entry.repo_id) != Some(&view) {
                self.publish_view(&view);
                views.insert(entry.repo_id.clone(), view);
            }
        }
        views.retain(|repo_id, view| view.container != container || entries.contains_key(repo_id));
    }

    async fn update(&self, repo_id: &str, f: impl FnOnce(&mut ResourceView)) {
        let mut views = self.views.write().await;
        if let Some(view) = views.get_mut(repo_id) {
            f(view);
            self.publish_view(view);
        }
    }

    /// Re-enable actions after a request that changed nothing.
    async fn release(&self, repo_id: &str) {
        self.update(repo_id, |view| view.action_pending = false).await;
    }

    fn publish_view(&self, view: &ResourceView) {
        // Ignore the SendError; it only means nobody is rendering.
        let _ = self.event_tx.send(InstallViewEvent::Updated { view: view.clone() });
    }

    fn toast(&self, message: String, severity: Severity) {
        self.notifications.enqueue(ToastRequest::new(message, severity));
    }
}

fn non_empty(s: &str) -> Option<&str> {
    Some(s).filter(|s| !s.trim().is_empty())
}
