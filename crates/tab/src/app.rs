//! Wiring for one tab: storage, identity, notifications, the push stream
//! and the two managers that consume it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use solasola_client::SolaSolaApi;
use solasola_core::config::ClientConfig;
use solasola_core::task::Severity;
use solasola_events::offline::wait_for_recovery;
use solasola_events::transport::http_base;
use solasola_events::{ConnectionEvent, Envelope, EventStreamClient, MESSAGE_CHANNEL};
use solasola_install::InstallCoordinator;
use solasola_notifications::{NotificationQueue, PersistentLog, ToastRequest};
use solasola_pipeline::{HostFrame, HostPost, TaskLifecycleManager};
use solasola_session::{FileSessionStore, MemorySessionStore, SessionStore, TabContext};

/// Capacity of the relay the managers subscribe to.
const RELAY_CAPACITY: usize = 256;

pub struct Tab {
    pub config: ClientConfig,
    pub api: Arc<SolaSolaApi>,
    pub context: TabContext,
    pub notifications: NotificationQueue,
    /// Envelopes from whichever stream connection is current.
    relay: broadcast::Sender<Envelope>,
    pub cancel: CancellationToken,
}

impl Tab {
    /// Open the session named `session` and apply the server's overrides.
    pub async fn open(mut config: ClientConfig, session: &str) -> anyhow::Result<Self> {
        let api = Arc::new(SolaSolaApi::new(http_base(&config.server_url)));

        match api.user_config().await {
            Ok(overrides) => {
                config.apply_overrides(&overrides);
                tracing::debug!(?overrides, "Applied user config overrides");
            }
            Err(e) => tracing::warn!(error = %e, "Could not load user config, using defaults"),
        }

        let store: Arc<dyn SessionStore> = match &config.session_dir {
            Some(dir) => Arc::new(FileSessionStore::open(dir, session)?),
            None => Arc::new(MemorySessionStore::new()),
        };
        let context = TabContext::new(Arc::clone(&store));
        let log = PersistentLog::open(store, config.persistent_log_cap);
        let notifications = NotificationQueue::new(config.toasts.clone(), Arc::new(log));
        let (relay, _) = broadcast::channel(RELAY_CAPACITY);

        tracing::info!(
            server_url = %config.server_url,
            session,
            client_id = %context.client_id(),
            "Tab opened",
        );

        Ok(Self {
            config,
            api,
            context,
            notifications,
            relay,
            cancel: CancellationToken::new(),
        })
    }

    pub fn envelopes(&self) -> broadcast::Receiver<Envelope> {
        self.relay.subscribe()
    }

    /// Build the lifecycle manager, bridged to the host frame when an
    /// origin is configured.
    pub fn lifecycle(
        &self,
    ) -> anyhow::Result<(TaskLifecycleManager, Option<UnboundedReceiver<HostPost>>)> {
        let (host, posts) = match &self.config.host_origin {
            Some(origin) => {
                let (frame, posts) = HostFrame::channel(origin)?;
                tracing::info!(origin = frame.origin(), "Bridging to host frame");
                (Some(frame), Some(posts))
            }
            None => (None, None),
        };
        let manager = TaskLifecycleManager::new(
            self.api.clone(),
            self.context.clone(),
            self.notifications.clone(),
            &self.config,
            host,
        );
        Ok((manager, posts))
    }

    pub fn installs(&self) -> InstallCoordinator {
        InstallCoordinator::new(
            self.api.clone(),
            self.api.clone(),
            &self.context,
            self.notifications.clone(),
        )
    }

    /// Keep a push connection open until [`shutdown`](Self::shutdown).
    ///
    /// A lost connection is never retried in place: the tab goes offline,
    /// polls health until the server is back and then opens a fresh client.
    pub fn spawn_stream(&self) -> JoinHandle<()> {
        let supervisor = StreamSupervisor {
            server_url: self.config.server_url.clone(),
            api: Arc::clone(&self.api),
            context: self.context.clone(),
            notifications: self.notifications.clone(),
            relay: self.relay.clone(),
            offline_interval: Duration::from_millis(self.config.offline_poll_interval_ms),
            cancel: self.cancel.clone(),
        };
        tokio::spawn(supervisor.run())
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.notifications.shutdown();
    }
}

struct StreamSupervisor {
    server_url: String,
    api: Arc<SolaSolaApi>,
    context: TabContext,
    notifications: NotificationQueue,
    relay: broadcast::Sender<Envelope>,
    offline_interval: Duration,
    cancel: CancellationToken,
}

impl StreamSupervisor {
    async fn run(self) {
        loop {
            let client = EventStreamClient::new(self.server_url.clone(), self.context.clone());
            let mut connection = client.connection_events();
            let inbound = client.subscribe(MESSAGE_CHANNEL).await;

            let reason = match client.connect().await {
                Ok(()) => self.forward(inbound, &mut connection).await,
                Err(e) => Some(e.to_string()),
            };
            client.close();

            let Some(reason) = reason else {
                return;
            };
            tracing::warn!(reason = %reason, "Push connection lost, going offline");
            self.notifications.enqueue(
                ToastRequest::new("Connection to the server was lost.", Severity::Error)
                    .persistent(),
            );

            match wait_for_recovery(self.api.as_ref(), self.offline_interval, &self.cancel).await {
                Some(attempts) => {
                    tracing::info!(attempts, "Server recovered, reconnecting");
                    self.notifications.enqueue(ToastRequest::new(
                        "Reconnected to the server.",
                        Severity::Success,
                    ));
                }
                None => return,
            }
        }
    }

    /// Relay envelopes until the connection is lost (`Some(reason)`) or the
    /// tab shuts down (`None`).
    async fn forward(
        &self,
        mut inbound: broadcast::Receiver<Envelope>,
        connection: &mut broadcast::Receiver<ConnectionEvent>,
    ) -> Option<String> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                received = inbound.recv() => match received {
                    Ok(envelope) => {
                        // Ignore the SendError; it only means nobody listens yet.
                        let _ = self.relay.send(envelope);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Stream relay lagged behind");
                    }
                    Err(RecvError::Closed) => return Some("stream closed".to_string()),
                },
                event = connection.recv() => match event {
                    Ok(ConnectionEvent::Lost { reason }) => return Some(reason),
                    Ok(ConnectionEvent::Connected) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return Some("stream closed".to_string()),
                },
            }
        }
    }
}
