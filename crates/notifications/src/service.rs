//! Async driver around [`ToastScheduler`].
//!
//! [`NotificationQueue`] is the single entry point every part of the tab
//! uses to show a message. Requests are routed by their [`LogTarget`]:
//! toasts go to the scheduler, log entries to the [`PersistentLog`].
//! A background task started with [`NotificationQueue::spawn_driver`]
//! sleeps until the scheduler's next deadline and publishes the resulting
//! [`ToastEvent`]s on a broadcast channel.

use std::future::pending;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use solasola_core::config::ToastConfig;
use solasola_core::task::{LogEntry, LogTarget};

use crate::log::PersistentLog;
use crate::scheduler::ToastScheduler;
use crate::toast::{Millis, ToastEvent, ToastId, ToastInstance, ToastRequest};

/// Broadcast channel capacity for toast events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared handle to the tab's notification queue. Cheap to clone.
#[derive(Clone)]
pub struct NotificationQueue {
    inner: Arc<Inner>,
}

struct Inner {
    scheduler: Mutex<ToastScheduler>,
    /// Zero point of the scheduler's millisecond timeline.
    origin: Instant,
    wake: Notify,
    event_tx: broadcast::Sender<ToastEvent>,
    log: Arc<PersistentLog>,
    cancel: CancellationToken,
}

impl NotificationQueue {
    pub fn new(config: ToastConfig, log: Arc<PersistentLog>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                scheduler: Mutex::new(ToastScheduler::new(config)),
                origin: Instant::now(),
                wake: Notify::new(),
                event_tx,
                log,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Route a request. Returns the toast id when one was queued.
    pub fn enqueue(&self, request: ToastRequest) -> Option<ToastId> {
        let entry = LogEntry {
            message: request.message.clone(),
            icon: request.icon.clone(),
            severity: request.severity,
            target: request.target,
            timestamp: None,
        };
        self.route(request, &entry)
    }

    /// Route a server log entry, keeping its timestamp for the log.
    pub fn notify(&self, entry: &LogEntry) -> Option<ToastId> {
        self.route(ToastRequest::from(entry), entry)
    }

    pub fn dismiss(&self, id: ToastId) -> bool {
        let now = self.inner.now();
        let found = self.inner.with_scheduler(|s| s.dismiss(id, now));
        self.inner.wake.notify_one();
        found
    }

    /// Drop every queued and visible toast. The persistent log is kept.
    pub fn clear_all(&self) {
        self.inner.with_scheduler(ToastScheduler::clear_all);
        self.inner.wake.notify_one();
    }

    /// Report the height a renderer measured for a toast.
    pub fn set_rendered_height(&self, id: ToastId, height_px: f64) {
        self.inner
            .with_scheduler(|s| s.set_rendered_height(id, height_px));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ToastEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn visible(&self) -> Vec<ToastInstance> {
        self.inner.with_scheduler(|s| s.visible().to_vec())
    }

    pub fn backlog_len(&self) -> usize {
        self.inner.with_scheduler(|s| s.backlog_len())
    }

    pub fn log(&self) -> &Arc<PersistentLog> {
        &self.inner.log
    }

    /// Start the timer task. Runs until [`shutdown`](Self::shutdown).
    pub fn spawn_driver(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.drive().await })
    }

    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    // ---- private helpers ----

    fn route(&self, request: ToastRequest, entry: &LogEntry) -> Option<ToastId> {
        let target: LogTarget = request.target;

        if target.records_log() {
            self.inner.log.append(entry);
        }
        if !target.shows_toast() {
            return None;
        }

        let now = self.inner.now();
        let id = self.inner.with_scheduler(|s| s.enqueue(request, now));
        self.inner.wake.notify_one();
        Some(id)
    }
}

impl Inner {
    fn now(&self) -> Millis {
        self.origin.elapsed().as_millis() as Millis
    }

    /// Run `f` against the scheduler and publish whatever it produced.
    fn with_scheduler<T>(&self, f: impl FnOnce(&mut ToastScheduler) -> T) -> T {
        let mut scheduler = self.lock();
        let out = f(&mut scheduler);
        self.publish(&mut scheduler);
        out
    }

    fn lock(&self) -> MutexGuard<'_, ToastScheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, scheduler: &mut ToastScheduler) {
        for event in scheduler.drain_events() {
            // Ignore the SendError; it only means there are no renderers.
            let _ = self.event_tx.send(event);
        }
    }

    async fn drive(&self) {
        tracing::debug!("Toast driver started");

        loop {
            let now = self.now();
            let deadline = self.with_scheduler(|s| {
                s.advance(now);
                s.next_deadline()
            });

            let sleep = async {
                match deadline {
                    Some(at) => {
                        tokio::time::sleep_until(self.origin + Duration::from_millis(at)).await
                    }
                    None => pending::<()>().await,
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = sleep => {}
            }
        }

        tracing::debug!("Toast driver stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solasola_core::task::Severity;
    use solasola_session::MemorySessionStore;

    fn queue() -> NotificationQueue {
        let log = PersistentLog::open(Arc::new(MemorySessionStore::new()), 50);
        NotificationQueue::new(ToastConfig::default(), Arc::new(log))
    }

    #[tokio::test]
    async fn log_only_entries_skip_the_toast_stack() {
        let q = queue();
        let entry = LogEntry::new("archived", Severity::Info).with_target(LogTarget::Log);

        assert_eq!(q.notify(&entry), None);
        assert!(q.visible().is_empty());
        assert_eq!(q.log().len(), 1);
    }

    #[tokio::test]
    async fn toast_only_requests_skip_the_log() {
        let q = queue();
        let id = q.enqueue(ToastRequest::new("hello", Severity::Success));

        assert!(id.is_some());
        assert_eq!(q.visible().len(), 1);
        assert!(q.log().is_empty());
    }

    #[tokio::test]
    async fn both_target_feeds_both_sinks() {
        let q = queue();
        q.notify(&LogEntry::new("done", Severity::Success));

        assert_eq!(q.visible().len(), 1);
        assert_eq!(q.log().entries()[0].message, "done");
    }
}
