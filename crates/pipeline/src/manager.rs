//! Task lifecycle state machine.
//!
//! `idle -> submitting -> awaiting_layout -> polling -> {completed | failed | cancelled}`
//!
//! A tracking task is spawned per tracked server task. It fetches the
//! layout, then polls the status endpoint on a fixed interval, processing
//! one response before issuing the next request. The tracked id lives in
//! the tab's session storage until a terminal status is observed, which is
//! what makes [`TaskLifecycleManager::resume`] possible after a reload.
//!
//! Two log cursors are kept per task: one for entries already shown as
//! notifications (fed by polls only, persisted across reloads) and one for
//! entries already forwarded to the host frame (fed by polls and by pushed
//! `log_update` frames).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use solasola_client::{SubmitRequest, TaskBackend};
use solasola_core::config::{ClientConfig, PollingConfig};
use solasola_core::integrity::{plan_submission, FileCheck, SubmissionPolicy};
use solasola_core::progress::ProgressTracker;
use solasola_core::task::{LogCursor, LogEntry, Severity, TaskSnapshot, TaskStatus};
use solasola_core::types::TaskId;
use solasola_events::{Action, Envelope};
use solasola_notifications::{NotificationQueue, ToastRequest};
use solasola_session::store::{load_json, save_json};
use solasola_session::TabContext;

use crate::error::PipelineError;
use crate::events::{LifecycleState, TaskViewEvent};
use crate::frame::{HostFrame, HostMessage};
use crate::layout::{fetch_layout, LayoutRetry};

/// Broadcast channel capacity for view events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Session key of the persisted notification cursor.
const LOG_CURSOR_KEY: &str = "lastLogCount";

#[derive(Debug, Serialize, Deserialize)]
struct StoredCursor {
    task_id: TaskId,
    seen: u64,
}

/// Shared handle; clones drive the same state machine.
#[derive(Clone)]
pub struct TaskLifecycleManager {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn TaskBackend>,
    context: TabContext,
    notifications: NotificationQueue,
    polling: PollingConfig,
    acquisition_stage: Option<u32>,
    policy: SubmissionPolicy,
    host: Option<HostFrame>,
    state_tx: watch::Sender<LifecycleState>,
    event_tx: broadcast::Sender<TaskViewEvent>,
    run: Mutex<Run>,
    cancel: CancellationToken,
}

/// Per-task bookkeeping.
#[derive(Default)]
struct Run {
    task_id: Option<TaskId>,
    displayed: LogCursor,
    forwarded: LogCursor,
    cancelling: bool,
    handle: Option<JoinHandle<()>>,
}

impl TaskLifecycleManager {
    pub fn new(
        backend: Arc<dyn TaskBackend>,
        context: TabContext,
        notifications: NotificationQueue,
        config: &ClientConfig,
        host: Option<HostFrame>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Idle);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                backend,
                context,
                notifications,
                polling: config.polling.clone(),
                acquisition_stage: config.acquisition_stage,
                policy: config.submission_policy,
                host,
                state_tx,
                event_tx,
                run: Mutex::new(Run::default()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskViewEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state_tx.subscribe()
    }

    /// Id of the task currently tracked, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        self.inner.run().task_id.clone()
    }

    /// Wait until no task is being submitted or tracked.
    pub async fn wait_settled(&self) -> LifecycleState {
        let mut rx = self.inner.state_tx.subscribe();
        let settled = rx.wait_for(|state| !state.is_active()).await.map(|s| *s);
        settled.unwrap_or_else(|_| self.state())
    }

    /// Submit a new task and start tracking it.
    ///
    /// `checks` are the integrity results for the files in `request`; they
    /// are applied with the configured [`SubmissionPolicy`].
    pub async fn submit(
        &self,
        request: SubmitRequest,
        checks: &[FileCheck],
    ) -> Result<TaskId, PipelineError> {
        self.inner.try_enter(LifecycleState::Submitting)?;

        match self.inner.send_submission(request, checks).await {
            Ok(task_id) => {
                tracing::info!(task_id = %task_id, "Task submitted");
                if let Err(e) = self.inner.context.persist_task_id(&task_id) {
                    tracing::warn!(task_id = %task_id, error = %e, "Failed to store task id");
                }
                self.inner.start(task_id.clone(), false);
                Ok(task_id)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Submission failed");
                self.inner.set_state(LifecycleState::Idle);
                self.inner
                    .notifications
                    .enqueue(ToastRequest::new(e.to_string(), Severity::Error));
                Err(e)
            }
        }
    }

    /// Re-attach to the task stored in the tab's session, if any.
    ///
    /// Emits [`TaskViewEvent::RedirectHome`] and returns `None` when there
    /// is nothing to resume.
    pub fn resume(&self) -> Result<Option<TaskId>, PipelineError> {
        let stored = match self.inner.context.load_task_id() {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stored task id");
                None
            }
        };

        let Some(task_id) = stored else {
            tracing::info!("No task to resume");
            self.inner.emit(TaskViewEvent::RedirectHome);
            return Ok(None);
        };

        self.inner.try_enter(LifecycleState::AwaitingLayout)?;
        tracing::info!(task_id = %task_id, "Resuming task");
        self.inner.start(task_id.clone(), true);
        Ok(Some(task_id))
    }

    /// Ask the server to cancel the tracked task.
    ///
    /// Returns once the request is acknowledged; the `cancelled` state is
    /// entered when a later poll observes it.
    pub async fn cancel(&self) -> Result<(), PipelineError> {
        let task_id = {
            let mut run = self.inner.run();
            let task_id = run.task_id.clone().ok_or(PipelineError::NoActiveTask)?;
            if run.cancelling {
                tracing::debug!(task_id = %task_id, "Cancellation already requested");
                return Ok(());
            }
            run.cancelling = true;
            task_id
        };

        self.inner.emit(TaskViewEvent::Cancelling);

        match self.inner.backend.cancel(&task_id).await {
            Ok(()) => {
                tracing::info!(task_id = %task_id, "Cancellation requested");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Cancel request failed");
                self.inner.run().cancelling = false;
                self.inner.notifications.enqueue(ToastRequest::new(
                    format!("Could not cancel: {e}"),
                    Severity::Error,
                ));
                Err(e.into())
            }
        }
    }

    /// Forward a pushed `log_update` for the tracked task to the host
    /// frame. Returns the number of entries forwarded.
    pub fn handle_envelope(&self, envelope: &Envelope) -> usize {
        if envelope.action != Action::LogUpdate {
            return 0;
        }
        let Some(task_id) = envelope.payload.task_id() else {
            return 0;
        };

        let fresh = {
            let mut run = self.inner.run();
            if run.task_id.as_deref() != Some(task_id) {
                return 0;
            }
            let offset = envelope.payload.offset.unwrap_or(1);
            run.forwarded.advance(&envelope.payload.logs, offset)
        };

        let logs: Vec<LogEntry> = fresh.into_iter().map(|log| log.entry).collect();
        self.inner.post_logs(logs)
    }

    /// Feed push-stream envelopes into [`handle_envelope`](Self::handle_envelope)
    /// until the channel closes or the manager shuts down.
    pub async fn follow(&self, mut rx: broadcast::Receiver<Envelope>) {
        loop {
            let received = tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                received = rx.recv() => received,
            };
            match received {
                Ok(envelope) => {
                    self.handle_envelope(&envelope);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Push listener lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Stop tracking. The stored task id is kept so a later run can resume.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }
}

impl Inner {
    // ---- state ----

    fn run(&self) -> MutexGuard<'_, Run> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TaskViewEvent) {
        // Ignore the SendError; it only means nobody is rendering.
        let _ = self.event_tx.send(event);
    }

    fn set_state(&self, next: LifecycleState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            tracing::debug!(state = %next, "Lifecycle state changed");
            self.emit(TaskViewEvent::StateChanged { state: next });
        }
    }

    /// Move to `next` unless a task is already in flight.
    fn try_enter(&self, next: LifecycleState) -> Result<(), PipelineError> {
        let mut blocked = None;
        self.state_tx.send_if_modified(|state| {
            if state.is_active() {
                blocked = Some(*state);
                false
            } else {
                *state = next;
                true
            }
        });
        if let Some(state) = blocked {
            return Err(PipelineError::Busy(state));
        }
        self.emit(TaskViewEvent::StateChanged { state: next });
        Ok(())
    }

    // ---- submission ----

    async fn send_submission(
        &self,
        mut request: SubmitRequest,
        checks: &[FileCheck],
    ) -> Result<TaskId, PipelineError> {
        request.validate()?;

        if !checks.is_empty() {
            let accepted = plan_submission(checks, self.policy)?;
            if accepted.len() < checks.len() {
                let skipped: Vec<&str> = checks
                    .iter()
                    .filter(|c| !accepted.contains(&c.name))
                    .map(|c| c.name.as_str())
                    .collect();
                tracing::warn!(skipped = ?skipped, "Submitting verified files only");
                self.notifications.enqueue(ToastRequest::new(
                    format!("Skipping unverified files: {}", skipped.join(", ")),
                    Severity::Warning,
                ));
            }

            let is_accepted = |name: &str| {
                accepted.iter().any(|a| a == name) || !checks.iter().any(|c| c.name == name)
            };
            request.music_files.retain(|f| is_accepted(&f.file_name));
            if request
                .lyrics_file
                .as_ref()
                .is_some_and(|f| !is_accepted(&f.file_name))
            {
                request.lyrics_file = None;
            }
            request.validate()?;
        }

        Ok(self.backend.submit(request).await?)
    }

    // ---- tracking ----

    fn start(self: &Arc<Self>, task_id: TaskId, resumed: bool) {
        self.notifications.clear_all();

        let displayed = self.load_cursor(&task_id);
        {
            let mut run = self.run();
            if let Some(previous) = run.handle.take() {
                previous.abort();
            }
            run.task_id = Some(task_id.clone());
            run.displayed = displayed;
            run.forwarded = displayed;
            run.cancelling = false;
        }

        self.set_state(LifecycleState::AwaitingLayout);
        self.emit(TaskViewEvent::Tracking {
            task_id: task_id.clone(),
            resumed,
        });

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move { inner.track(task_id).await });
        self.run().handle = Some(handle);
    }

    async fn track(&self, task_id: TaskId) {
        let retry = LayoutRetry::from(&self.polling);
        let layout = match fetch_layout(self.backend.as_ref(), &task_id, &retry, &self.cancel).await
        {
            Ok(layout) => layout,
            Err(PipelineError::Shutdown) => return,
            Err(e) => {
                self.abort_layout(&task_id, &e);
                return;
            }
        };

        let mut tracker = ProgressTracker::new(layout, self.acquisition_stage);
        self.set_state(LifecycleState::Polling);

        let period = Duration::from_millis(self.polling.poll_interval_ms.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.backend.status(&task_id) => result,
            };

            match result {
                Ok(snapshot) => {
                    if self.apply_snapshot(&task_id, &mut tracker, snapshot) {
                        return;
                    }
                }
                Err(e) if e.is_not_found() => {
                    self.vanish(&task_id);
                    return;
                }
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Status poll failed, retrying next interval");
                }
            }
        }
    }

    /// Render one status snapshot. Returns `true` once the task is terminal.
    fn apply_snapshot(
        &self,
        task_id: &str,
        tracker: &mut ProgressTracker,
        snapshot: TaskSnapshot,
    ) -> bool {
        let frame = tracker.apply(&snapshot.progress_details, &snapshot.current_step);
        self.emit(TaskViewEvent::Progress { frame });
        self.forward_polled_logs(task_id, &snapshot.ui_logs);

        match snapshot.status {
            TaskStatus::Pending | TaskStatus::Running => false,
            TaskStatus::Completed => {
                let frame = tracker.complete();
                self.emit(TaskViewEvent::Progress { frame });

                match snapshot.results.filter(|r| !r.is_null()) {
                    Some(results) => {
                        tracing::info!(task_id, "Task completed");
                        self.post_host(HostMessage::Status {
                            status: TaskStatus::Completed,
                            results: Some(results.clone()),
                            error: None,
                        });
                        self.finish(LifecycleState::Completed);
                        self.emit(TaskViewEvent::Completed { results });
                    }
                    None => {
                        tracing::warn!(task_id, "Task completed without results");
                        self.fail(
                            TaskStatus::Completed,
                            "Processing finished but produced no results".to_string(),
                        );
                    }
                }
                true
            }
            TaskStatus::Failed => {
                tracker.clear_pulsing();
                let message = if snapshot.current_step.trim().is_empty() {
                    "Processing failed".to_string()
                } else {
                    snapshot.current_step
                };
                tracing::warn!(task_id, message = %message, "Task failed");
                self.fail(TaskStatus::Failed, message);
                true
            }
            TaskStatus::Cancelled => {
                tracker.clear_pulsing();
                tracing::info!(task_id, "Task cancelled");
                self.post_host(HostMessage::Status {
                    status: TaskStatus::Cancelled,
                    results: None,
                    error: None,
                });
                self.notifications
                    .enqueue(ToastRequest::new("Processing cancelled", Severity::Info));
                self.finish(LifecycleState::Cancelled);
                self.emit(TaskViewEvent::Cancelled);
                true
            }
        }
    }

    fn fail(&self, status: TaskStatus, message: String) {
        self.post_host(HostMessage::Status {
            status,
            results: None,
            error: Some(message.clone()),
        });
        self.notifications
            .enqueue(ToastRequest::new(message.clone(), Severity::Error));
        self.finish(LifecycleState::Failed);
        self.emit(TaskViewEvent::Failed { message });
    }

    fn abort_layout(&self, task_id: &str, error: &PipelineError) {
        let message = format!("Could not load the progress layout: {error}");
        tracing::error!(task_id, error = %error, "Aborting task view");
        self.post_host(HostMessage::Status {
            status: TaskStatus::Failed,
            results: None,
            error: Some(message.clone()),
        });
        self.notifications
            .enqueue(ToastRequest::new(message.clone(), Severity::Error));
        self.finish(LifecycleState::Failed);
        self.emit(TaskViewEvent::LayoutFailed { message });
    }

    /// Polling hit 404: drop the task without a notification.
    fn vanish(&self, task_id: &str) {
        tracing::info!(task_id, "Task no longer exists on the server");
        self.finish(LifecycleState::Idle);
        self.emit(TaskViewEvent::TaskVanished);
    }

    fn finish(&self, state: LifecycleState) {
        {
            let mut run = self.run();
            run.task_id = None;
            run.cancelling = false;
        }
        if let Err(e) = self.context.clear_task_id() {
            tracing::warn!(error = %e, "Failed to clear stored task id");
        }
        if let Err(e) = self.context.store().remove(LOG_CURSOR_KEY) {
            tracing::warn!(error = %e, "Failed to clear stored log cursor");
        }
        self.set_state(state);
    }

    // ---- logs ----

    fn forward_polled_logs(&self, task_id: &str, logs: &[LogEntry]) {
        let (shown, forwarded, seen) = {
            let mut run = self.run();
            let shown = run.displayed.advance(logs, 1);
            let forwarded = run.forwarded.advance(logs, 1);
            (shown, forwarded, run.displayed.last_seen())
        };

        if !shown.is_empty() {
            self.save_cursor(task_id, seen);
        }
        for log in shown {
            self.notifications.notify(&log.entry);
            self.emit(TaskViewEvent::Log { log });
        }
        self.post_logs(forwarded.into_iter().map(|log| log.entry).collect());
    }

    fn post_logs(&self, logs: Vec<LogEntry>) -> usize {
        let count = logs.len();
        if count > 0 {
            self.post_host(HostMessage::LogUpdate { logs });
        }
        count
    }

    fn post_host(&self, message: HostMessage) {
        if let Some(host) = &self.host {
            host.post(&message);
        }
    }

    fn load_cursor(&self, task_id: &str) -> LogCursor {
        match load_json::<StoredCursor>(self.context.store().as_ref(), LOG_CURSOR_KEY) {
            Ok(Some(stored)) if stored.task_id == task_id => LogCursor::new(stored.seen),
            Ok(_) => LogCursor::default(),
            Err(e) => {
                tracing::warn!(task_id, error = %e, "Failed to read stored log cursor");
                LogCursor::default()
            }
        }
    }

    fn save_cursor(&self, task_id: &str, seen: u64) {
        let stored = StoredCursor {
            task_id: task_id.to_string(),
            seen,
        };
        if let Err(e) = save_json(self.context.store().as_ref(), LOG_CURSOR_KEY, &stored) {
            tracing::warn!(task_id, error = %e, "Failed to store log cursor");
        }
    }
}
