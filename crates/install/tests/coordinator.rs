//! Integration tests for `InstallCoordinator` with two tabs sharing one
//! fake server and its install lock.

use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use tokio::sync::broadcast::Receiver;
use tokio::sync::Notify;

use solasola_client::{ApiError, ModelBackend, SubmitRequest, TaskBackend};
use solasola_core::config::ToastConfig;
use solasola_core::install::{
    InstallPhase, ManageRequest, ManageResponse, ManageStatus, ModelEntry, ModelsStatus,
    CONTAINER_FEATURE_MODELS, CONTAINER_SEPARATION_MODELS,
};
use solasola_core::layout::ProgressLayout;
use solasola_core::task::{Severity, TaskSnapshot, TaskStatus};
use solasola_core::types::{ClientId, RepoId, TaskId};
use solasola_events::{Action, Envelope, Payload};
use solasola_install::{InstallCoordinator, InstallError, InstallViewEvent, ResourceState};
use solasola_notifications::{NotificationQueue, PersistentLog};
use solasola_session::{MemorySessionStore, TabContext};

const GENRE: &str = "org/genre";
const STEMS: &str = "org/stems";

// ---------------------------------------------------------------------------
// Fake server
// ---------------------------------------------------------------------------

struct FakeServer {
    models: Mutex<ModelsStatus>,
    /// The global install lock: (actor, repo).
    installer: Mutex<Option<(ClientId, RepoId)>>,
    manage_calls: Mutex<Vec<(ClientId, ManageRequest)>>,
    cancelled: Mutex<Vec<TaskId>>,
    refreshes: Mutex<u32>,
    /// When set, `manage_model` waits for a notification before replying.
    hold: Mutex<Option<Arc<Notify>>>,
}

impl FakeServer {
    fn new() -> Arc<Self> {
        let mut models = ModelsStatus::default();
        models.feature_models.insert(GENRE.into(), entry(GENRE, "Genre Classifier", false));
        models
            .separation_models
            .insert(STEMS.into(), entry(STEMS, "Stem Splitter", true));
        Arc::new(Self {
            models: Mutex::new(models),
            installer: Mutex::new(None),
            manage_calls: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            refreshes: Mutex::new(0),
            hold: Mutex::new(None),
        })
    }

    fn with_entry(&self, repo_id: &str, f: impl FnOnce(&mut ModelEntry)) {
        let mut models = self.models.lock().unwrap();
        let entry = models
            .feature_models
            .get_mut(repo_id)
            .unwrap_or_else(|| panic!("no entry {repo_id}"));
        f(entry);
    }

    /// The worker finished: release the lock and mark the model installed.
    fn finish_install(&self, repo_id: &str) {
        self.installer.lock().unwrap().take();
        self.with_entry(repo_id, |e| {
            e.installing = false;
            e.installer_client_id = None;
            e.installed = true;
            e.deletion_path = format!("{}.json", e.name);
        });
    }
}

fn entry(repo_id: &str, name: &str, installed: bool) -> ModelEntry {
    ModelEntry {
        name: name.into(),
        installed,
        size: "1.0 GB".into(),
        repo_id: repo_id.into(),
        deletion_path: if installed { format!("{name}.json") } else { String::new() },
        installing: false,
        installer_client_id: None,
    }
}

#[async_trait]
impl ModelBackend for FakeServer {
    async fn models_status(&self) -> Result<ModelsStatus, ApiError> {
        Ok(self.models.lock().unwrap().clone())
    }

    async fn refresh_models_status(&self) -> Result<ModelsStatus, ApiError> {
        *self.refreshes.lock().unwrap() += 1;
        Ok(self.models.lock().unwrap().clone())
    }

    async fn manage_model(
        &self,
        client_id: &str,
        request: &ManageRequest,
    ) -> Result<ManageResponse, ApiError> {
        self.manage_calls
            .lock()
            .unwrap()
            .push((client_id.to_string(), request.clone()));

        let hold = self.hold.lock().unwrap().clone();
        if let Some(hold) = hold {
            hold.notified().await;
        }

        let mut installer = self.installer.lock().unwrap();
        if installer.is_some() {
            return Ok(ManageResponse {
                status: ManageStatus::Waiting,
                task_id: None,
                message: Some("Another installation is already in progress.".into()),
            });
        }

        match request {
            ManageRequest::Install { repo_id, .. } => {
                *installer = Some((client_id.to_string(), repo_id.clone()));
                drop(installer);
                self.with_entry(repo_id, |e| {
                    e.installing = true;
                    e.installer_client_id = Some(client_id.to_string());
                });
                Ok(ManageResponse {
                    status: ManageStatus::Running,
                    task_id: Some("install-1".into()),
                    message: None,
                })
            }
            ManageRequest::Delete { deletion_path, .. } => {
                let mut guard = self.models.lock().unwrap();
                let models = &mut *guard;
                let found = models
                    .feature_models
                    .values_mut()
                    .chain(models.separation_models.values_mut())
                    .find(|e| &e.deletion_path == deletion_path);
                match found {
                    Some(e) => {
                        e.installed = false;
                        e.deletion_path.clear();
                        Ok(ManageResponse {
                            status: ManageStatus::Ok,
                            task_id: None,
                            message: None,
                        })
                    }
                    None => Ok(ManageResponse {
                        status: ManageStatus::Error,
                        task_id: None,
                        message: Some("Manifest not found.".into()),
                    }),
                }
            }
        }
    }
}

#[async_trait]
impl TaskBackend for FakeServer {
    async fn submit(&self, _request: SubmitRequest) -> Result<TaskId, ApiError> {
        unreachable!("install tests never submit")
    }

    async fn status(&self, _task_id: &str) -> Result<TaskSnapshot, ApiError> {
        unreachable!("install tests never poll")
    }

    async fn layout(&self, _task_id: &str) -> Result<ProgressLayout, ApiError> {
        unreachable!("install tests never fetch layouts")
    }

    async fn cancel(&self, task_id: &str) -> Result<(), ApiError> {
        self.cancelled.lock().unwrap().push(task_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Tab {
    coordinator: InstallCoordinator,
    events: Receiver<InstallViewEvent>,
    notifications: NotificationQueue,
}

impl Tab {
    fn id(&self) -> String {
        self.coordinator.client_id().to_string()
    }

    async fn state(&self, repo_id: &str) -> ResourceState {
        self.coordinator.view(repo_id).await.unwrap().state
    }

    fn drain(&mut self) -> Vec<InstallViewEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn toasts(&self) -> Vec<(String, Severity)> {
        self.notifications
            .visible()
            .into_iter()
            .map(|t| (t.message, t.severity))
            .collect()
    }
}

async fn tab(server: &Arc<FakeServer>) -> Tab {
    let store = Arc::new(MemorySessionStore::new());
    let context = TabContext::new(store.clone());
    let notifications = NotificationQueue::new(
        ToastConfig::default(),
        Arc::new(PersistentLog::open(store, 500)),
    );
    let coordinator =
        InstallCoordinator::new(server.clone(), server.clone(), &context, notifications.clone());
    coordinator.load().await.unwrap();
    let events = coordinator.subscribe();
    Tab {
        coordinator,
        events,
        notifications,
    }
}

fn envelope(action: Action, actor: &str, repo_id: &str, f: impl FnOnce(&mut Payload)) -> Envelope {
    let mut payload = Payload {
        actor_client_id: Some(actor.into()),
        repo_id: Some(repo_id.into()),
        task_id: Some("install-1".into()),
        ui_container_id: Some(CONTAINER_FEATURE_MODELS.into()),
        ..Default::default()
    };
    f(&mut payload);
    Envelope::new(action, payload)
}

fn status(actor: &str, status: TaskStatus, message: &str) -> Envelope {
    envelope(Action::StatusUpdate, actor, GENRE, |p| {
        p.status = Some(status);
        p.message = Some(message.into());
    })
}

fn progress(actor: &str, value: f64, message: &str) -> Envelope {
    envelope(Action::ProgressUpdate, actor, GENRE, |p| {
        p.status = Some(TaskStatus::Running);
        p.progress = Some(value);
        p.message = Some(message.into());
    })
}

fn refresh_all(container: Option<&str>) -> Envelope {
    Envelope::new(
        Action::RefreshAll,
        Payload {
            ui_container_id: container.map(str::to_string),
            status: Some(TaskStatus::Completed),
            ..Default::default()
        },
    )
}

// ---------------------------------------------------------------------------
// Test: the server lock admits one actor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_tab_is_told_to_wait() {
    let server = FakeServer::new();
    let mut a = tab(&server).await;
    let mut b = tab(&server).await;

    let started = a.coordinator.install(GENRE).await.unwrap();
    assert_eq!(started, ManageStatus::Running);
    assert_matches!(
        a.state(GENRE).await,
        ResourceState::Installing { task_id: Some(ref id), .. } if id == "install-1"
    );

    let waited = b.coordinator.install(GENRE).await.unwrap();
    assert_eq!(waited, ManageStatus::Waiting);
    let view = b.coordinator.view(GENRE).await.unwrap();
    assert_eq!(view.state, ResourceState::NotInstalled);
    assert!(!view.action_pending);
    assert_eq!(
        b.toasts(),
        vec![(
            "Another installation is already in progress.".to_string(),
            Severity::Warning
        )]
    );

    // Both tabs rendered the optimistic disable before the reply.
    assert_matches!(a.drain().first(), Some(InstallViewEvent::Updated { view }) if view.action_pending);
    assert_matches!(b.drain().first(), Some(InstallViewEvent::Updated { view }) if view.action_pending);
}

#[tokio::test]
async fn installing_twice_from_the_actor_is_rejected() {
    let server = FakeServer::new();
    let a = tab(&server).await;

    a.coordinator.install(GENRE).await.unwrap();
    assert_matches!(
        a.coordinator.install(GENRE).await,
        Err(InstallError::AlreadyInstalling(id)) if id == GENRE
    );
    assert_eq!(server.manage_calls.lock().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Test: observers render system busy, actors keep their renderer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn observer_shows_system_busy_and_logs_it() {
    let server = FakeServer::new();
    let a = tab(&server).await;
    let b = tab(&server).await;

    a.coordinator.install(GENRE).await.unwrap();
    let started = status(&a.id(), TaskStatus::Running, "Installation started.");
    a.coordinator.handle_envelope(&started).await;
    b.coordinator.handle_envelope(&started).await;

    assert!(a.state(GENRE).await.is_installing());
    assert_matches!(
        b.state(GENRE).await,
        ResourceState::SystemBusy { notice } if notice.contains("Installation started.")
    );

    // Routed to the log only.
    assert!(b.toasts().is_empty());
    assert_eq!(b.notifications.log().len(), 1);
}

#[tokio::test]
async fn failure_toasts_only_on_the_actor() {
    let server = FakeServer::new();
    let a = tab(&server).await;
    let b = tab(&server).await;

    a.coordinator.install(GENRE).await.unwrap();
    let started = status(&a.id(), TaskStatus::Running, "");
    b.coordinator.handle_envelope(&started).await;

    let failed = status(&a.id(), TaskStatus::Failed, "Disk full");
    a.coordinator.handle_envelope(&failed).await;
    b.coordinator.handle_envelope(&failed).await;

    assert_eq!(a.state(GENRE).await, ResourceState::NotInstalled);
    assert_eq!(b.state(GENRE).await, ResourceState::NotInstalled);
    assert_eq!(a.toasts(), vec![("Disk full".to_string(), Severity::Error)]);
    assert!(b.toasts().is_empty());
}

// ---------------------------------------------------------------------------
// Test: two-phase progress for the actor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_moves_from_download_to_verification() {
    let server = FakeServer::new();
    let mut a = tab(&server).await;
    let b = tab(&server).await;

    a.coordinator.install(GENRE).await.unwrap();
    a.drain();

    for envelope in [
        progress(&a.id(), 55.0, "Downloading weights..."),
        progress(&a.id(), 20.0, "Verifying checksums..."),
        progress(&a.id(), 60.0, "Verifying checksums..."),
    ] {
        a.coordinator.handle_envelope(&envelope).await;
        b.coordinator.handle_envelope(&envelope).await;
    }

    let progress = match a.state(GENRE).await {
        ResourceState::Installing { progress, .. } => progress,
        other => panic!("expected installing, got {other:?}"),
    };
    assert_eq!(progress.phase, InstallPhase::Verification);
    assert_eq!(progress.download, 100.0);
    assert_eq!(progress.verification, 60.0);
    assert_eq!(progress.overall(), 80.0);

    let updates = a
        .drain()
        .into_iter()
        .filter(|e| matches!(e, InstallViewEvent::Progress { .. }))
        .count();
    assert_eq!(updates, 3);

    // Progress is meaningless to observers.
    assert_eq!(b.state(GENRE).await, ResourceState::NotInstalled);
}

#[tokio::test]
async fn progress_broadcast_before_the_reply_is_kept() {
    let server = FakeServer::new();
    let hold = Arc::new(Notify::new());
    *server.hold.lock().unwrap() = Some(hold.clone());

    let a = tab(&server).await;
    let actor = a.id();
    let coordinator = Arc::new(a.coordinator);

    let installing = Arc::clone(&coordinator);
    let reply = tokio::spawn(async move { installing.install(GENRE).await });
    while server.manage_calls.lock().unwrap().is_empty() {
        tokio::task::yield_now().await;
    }

    // The server starts broadcasting while the manage reply is still in flight.
    coordinator
        .handle_envelope(&status(&actor, TaskStatus::Running, ""))
        .await;
    coordinator
        .handle_envelope(&progress(&actor, 40.0, "Downloading weights..."))
        .await;

    hold.notify_one();
    assert_eq!(reply.await.unwrap().unwrap(), ManageStatus::Running);

    let view = coordinator.view(GENRE).await.unwrap();
    assert!(!view.action_pending);
    let (task_id, progress) = match view.state {
        ResourceState::Installing { task_id, progress } => (task_id, progress),
        other => panic!("expected installing, got {other:?}"),
    };
    assert_eq!(task_id.as_deref(), Some("install-1"));
    assert_eq!(progress.phase, InstallPhase::Download);
    assert_eq!(progress.download, 40.0);
    assert_eq!(progress.message, "Downloading weights...");
}

// ---------------------------------------------------------------------------
// Test: refresh_all reconciles a container or reloads everything
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refresh_all_with_container_updates_in_place() {
    let server = FakeServer::new();
    let mut a = tab(&server).await;
    let mut b = tab(&server).await;

    a.coordinator.install(GENRE).await.unwrap();
    b.coordinator
        .handle_envelope(&status(&a.id(), TaskStatus::Running, ""))
        .await;
    a.drain();
    b.drain();

    server.finish_install(GENRE);
    let done = refresh_all(Some(CONTAINER_FEATURE_MODELS));
    a.coordinator.handle_envelope(&done).await;
    b.coordinator.handle_envelope(&done).await;

    for tab in [&mut a, &mut b] {
        assert_eq!(tab.state(GENRE).await, ResourceState::Installed);
        let events = tab.drain();
        assert_eq!(events.len(), 1);
        assert_matches!(&events[0], InstallViewEvent::Updated { view } if view.repo_id == GENRE);
    }
}

#[tokio::test]
async fn refresh_all_without_container_reloads() {
    let server = FakeServer::new();
    let mut a = tab(&server).await;

    a.coordinator.handle_envelope(&refresh_all(None)).await;

    let events = a.drain();
    assert_matches!(
        events.as_slice(),
        [InstallViewEvent::Reloaded { views }] if views.len() == 2
            && views[0].container == CONTAINER_FEATURE_MODELS
            && views[1].container == CONTAINER_SEPARATION_MODELS
    );
}

// ---------------------------------------------------------------------------
// Test: delete disables until the authoritative broadcast
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_stays_disabled_until_refresh_all() {
    let server = FakeServer::new();
    let a = tab(&server).await;

    let status = a.coordinator.delete(STEMS).await.unwrap();
    assert_eq!(status, ManageStatus::Ok);
    let view = a.coordinator.view(STEMS).await.unwrap();
    assert!(view.action_pending);
    assert_eq!(view.state, ResourceState::Installed);

    a.coordinator
        .handle_envelope(&refresh_all(Some(CONTAINER_SEPARATION_MODELS)))
        .await;
    let view = a.coordinator.view(STEMS).await.unwrap();
    assert!(!view.action_pending);
    assert_eq!(view.state, ResourceState::NotInstalled);

    assert_matches!(
        a.coordinator.delete(STEMS).await,
        Err(InstallError::NotInstalled(id)) if id == STEMS
    );
}

#[tokio::test]
async fn delete_while_locked_waits() {
    let server = FakeServer::new();
    let a = tab(&server).await;
    let b = tab(&server).await;

    a.coordinator.install(GENRE).await.unwrap();
    assert_eq!(b.coordinator.delete(STEMS).await.unwrap(), ManageStatus::Waiting);

    let view = b.coordinator.view(STEMS).await.unwrap();
    assert!(!view.action_pending);
    assert_eq!(view.state, ResourceState::Installed);
    assert_eq!(b.toasts()[0].1, Severity::Warning);
}

// ---------------------------------------------------------------------------
// Test: a reloaded tab re-attaches to installs in flight
// ---------------------------------------------------------------------------

#[tokio::test]
async fn load_reattaches_own_install_and_marks_foreign_busy() {
    let server = FakeServer::new();
    let store = Arc::new(MemorySessionStore::new());
    let context = TabContext::new(store.clone());
    let owner = context.client_id();
    server.with_entry(GENRE, |e| {
        e.installing = true;
        e.installer_client_id = Some(owner.clone());
    });

    // Same session storage, so the same client id after reload.
    let notifications = NotificationQueue::new(
        ToastConfig::default(),
        Arc::new(PersistentLog::open(store.clone(), 500)),
    );
    let reloaded = InstallCoordinator::new(
        server.clone(),
        server.clone(),
        &TabContext::new(store),
        notifications,
    );
    reloaded.load().await.unwrap();
    assert_matches!(
        reloaded.view(GENRE).await.unwrap().state,
        ResourceState::Installing { task_id: None, .. }
    );

    let other = tab(&server).await;
    assert_matches!(other.state(GENRE).await, ResourceState::SystemBusy { .. });
}

#[tokio::test]
async fn forced_refresh_rescans() {
    let server = FakeServer::new();
    let a = tab(&server).await;

    a.coordinator.refresh(true).await.unwrap();
    a.coordinator.refresh(false).await.unwrap();
    assert_eq!(*server.refreshes.lock().unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Test: only the actor can cancel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_requires_the_actor() {
    let server = FakeServer::new();
    let a = tab(&server).await;
    let b = tab(&server).await;

    a.coordinator.install(GENRE).await.unwrap();
    b.coordinator
        .handle_envelope(&status(&a.id(), TaskStatus::Running, ""))
        .await;

    assert_matches!(
        b.coordinator.cancel(GENRE).await,
        Err(InstallError::NotActor(_))
    );
    a.coordinator.cancel(GENRE).await.unwrap();
    assert_eq!(*server.cancelled.lock().unwrap(), vec!["install-1".to_string()]);

    a.coordinator
        .handle_envelope(&status(&a.id(), TaskStatus::Cancelled, "Installation cancelled."))
        .await;
    assert_eq!(a.state(GENRE).await, ResourceState::NotInstalled);
}
