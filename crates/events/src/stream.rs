//! One persistent push connection per tab, fanned out to subscribers.
//!
//! [`EventStreamClient::connect`] opens the connection at most once.
//! Every parsed envelope is published on the channel it arrived on
//! (`"message"` unless the server named an SSE event). A connection
//! error is fatal: the client moves to [`ConnectionState::Failed`],
//! publishes [`ConnectionEvent::Lost`] and never reconnects in place.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use solasola_core::error::CoreError;
use solasola_core::types::ClientId;
use solasola_session::TabContext;

use crate::messages::{parse_envelope, Envelope};
use crate::transport::{self, FrameStream, InboundFrame};

/// Channel every unnamed envelope is delivered on.
pub const MESSAGE_CHANNEL: &str = "message";

/// Buffer capacity of each subscriber channel.
const CHANNEL_CAPACITY: usize = 256;

/// Errors from the push connection.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Failed to establish the connection.
    #[error("Connection error: {0}")]
    Connect(String),

    /// The server answered the stream request with a non-2xx status.
    #[error("Event stream rejected with HTTP {status}")]
    Rejected { status: u16 },

    /// A receive error on an established connection.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection has ended and will not be reopened.
    #[error("Event stream closed: {0}")]
    Closed(String),
}

impl From<StreamError> for CoreError {
    fn from(err: StreamError) -> Self {
        CoreError::StreamClosed(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    /// Lost after an error; the tab should switch to degraded mode.
    Failed,
    /// Closed on request.
    Closed,
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Lost { reason: String },
}

/// Push stream client shared by every component of one tab.
#[derive(Clone)]
pub struct EventStreamClient {
    inner: Arc<Inner>,
}

struct Inner {
    base_url: String,
    http: reqwest::Client,
    context: TabContext,
    channels: RwLock<HashMap<String, broadcast::Sender<Envelope>>>,
    connection_tx: broadcast::Sender<ConnectionEvent>,
    state: Mutex<ConnectionState>,
    cancel: CancellationToken,
}

impl EventStreamClient {
    /// * `base_url` - server base URL; `ws(s)://` selects WebSocket.
    pub fn new(base_url: impl Into<String>, context: TabContext) -> Self {
        Self::with_http(reqwest::Client::new(), base_url, context)
    }

    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>, context: TabContext) -> Self {
        let (connection_tx, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                base_url: base_url.into(),
                http,
                context,
                channels: RwLock::new(HashMap::new()),
                connection_tx,
                state: Mutex::new(ConnectionState::Idle),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// The tab's persisted identity, generated on first use.
    pub fn client_id(&self) -> ClientId {
        self.inner.context.client_id()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.lock().await
    }

    /// Open the push connection. A no-op while already connected.
    ///
    /// Once the connection has failed or been closed this returns
    /// [`StreamError::Closed`]; recovery builds a fresh client.
    pub async fn connect(&self) -> Result<(), StreamError> {
        let mut state = self.inner.state.lock().await;
        match *state {
            ConnectionState::Connecting | ConnectionState::Connected => return Ok(()),
            ConnectionState::Failed | ConnectionState::Closed => {
                return Err(StreamError::Closed(
                    "connection already ended".to_string(),
                ))
            }
            ConnectionState::Idle => {}
        }
        *state = ConnectionState::Connecting;

        let client_id = self.client_id();
        match transport::open(&self.inner.http, &self.inner.base_url, &client_id).await {
            Ok(frames) => {
                *state = ConnectionState::Connected;
                let _ = self.inner.connection_tx.send(ConnectionEvent::Connected);
                tokio::spawn(run_reader(Arc::clone(&self.inner), frames));
                Ok(())
            }
            Err(e) => {
                *state = ConnectionState::Failed;
                tracing::error!(client_id = %client_id, error = %e, "Event stream connection failed");
                let _ = self.inner.connection_tx.send(ConnectionEvent::Lost {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Receive every envelope delivered on `channel`.
    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<Envelope> {
        let mut channels = self.inner.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.connection_tx.subscribe()
    }

    /// Close the connection without signalling a loss.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }
}

impl Inner {
    async fn dispatch(&self, frame: InboundFrame) {
        let envelope = match parse_envelope(&frame.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    raw_message = %frame.data,
                    "Failed to parse event stream message",
                );
                return;
            }
        };

        tracing::debug!(channel = %frame.channel, action = ?envelope.action, "Event received");

        let channels = self.channels.read().await;
        if let Some(sender) = channels.get(&frame.channel) {
            // Ignore the SendError; it only means there are zero receivers.
            let _ = sender.send(envelope);
        }
    }
}

async fn run_reader(inner: Arc<Inner>, mut frames: FrameStream) {
    let reason = loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => {
                *inner.state.lock().await = ConnectionState::Closed;
                tracing::info!("Event stream closed");
                return;
            }
            next = frames.next() => match next {
                Some(Ok(frame)) => inner.dispatch(frame).await,
                Some(Err(e)) => break e.to_string(),
                None => break "server ended the stream".to_string(),
            }
        }
    };

    tracing::error!(reason = %reason, "Event stream lost");
    *inner.state.lock().await = ConnectionState::Failed;
    let _ = inner.connection_tx.send(ConnectionEvent::Lost { reason });
}
