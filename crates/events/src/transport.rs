//! Push connection transports.
//!
//! Both transports yield [`InboundFrame`]s. The scheme of the base URL
//! picks one: `http(s)://` opens the SSE endpoint, `ws(s)://` opens a
//! WebSocket on the same path.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use solasola_client::api::CLIENT_ID_HEADER;

use crate::sse::SseDecoder;
use crate::stream::{StreamError, MESSAGE_CHANNEL};

/// Path of the push endpoint on the server.
pub const STREAM_PATH: &str = "/api/model-status-stream";

/// One inbound message tagged with the channel it is delivered on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub channel: String,
    pub data: String,
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<InboundFrame, StreamError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Sse,
    WebSocket,
}

impl TransportKind {
    pub fn for_url(url: &str) -> Self {
        if url.starts_with("ws://") || url.starts_with("wss://") {
            TransportKind::WebSocket
        } else {
            TransportKind::Sse
        }
    }
}

/// HTTP base URL for REST calls when the configured URL is a WebSocket one.
pub fn http_base(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        url.to_string()
    }
}

/// Open the push connection for `client_id`.
pub async fn open(
    http: &reqwest::Client,
    base_url: &str,
    client_id: &str,
) -> Result<FrameStream, StreamError> {
    let base_url = base_url.trim_end_matches('/');
    match TransportKind::for_url(base_url) {
        TransportKind::Sse => open_sse(http, base_url, client_id).await,
        TransportKind::WebSocket => open_ws(base_url, client_id).await,
    }
}

// ---- private helpers ----

async fn open_sse(
    http: &reqwest::Client,
    base_url: &str,
    client_id: &str,
) -> Result<FrameStream, StreamError> {
    let url = format!("{base_url}{STREAM_PATH}");
    let response = http
        .get(&url)
        .header(CLIENT_ID_HEADER, client_id)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| StreamError::Connect(format!("Failed to open event stream at {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(StreamError::Rejected {
            status: status.as_u16(),
        });
    }

    tracing::info!(client_id, transport = "sse", "Connected to event stream at {url}");

    let frames = response
        .bytes_stream()
        .scan(SseDecoder::new(), |decoder, chunk| {
            let items: Vec<Result<InboundFrame, StreamError>> = match chunk {
                Ok(bytes) => decoder
                    .feed(&bytes)
                    .into_iter()
                    .map(|frame| {
                        Ok(InboundFrame {
                            channel: frame.event.unwrap_or_else(|| MESSAGE_CHANNEL.to_string()),
                            data: frame.data,
                        })
                    })
                    .collect(),
                Err(e) => vec![Err(StreamError::Transport(e.to_string()))],
            };
            futures::future::ready(Some(futures::stream::iter(items)))
        })
        .flatten();

    Ok(Box::pin(frames))
}

async fn open_ws(base_url: &str, client_id: &str) -> Result<FrameStream, StreamError> {
    let url = format!("{base_url}{STREAM_PATH}?clientId={client_id}");
    let (ws_stream, _response) = connect_async(&url)
        .await
        .map_err(|e| StreamError::Connect(format!("Failed to connect to {base_url}: {e}")))?;

    tracing::info!(client_id, transport = "websocket", "Connected to event stream at {base_url}");

    let frames = ws_stream.filter_map(|msg| {
        let item = match msg {
            Ok(Message::Text(text)) => Some(Ok(InboundFrame {
                channel: MESSAGE_CHANNEL.to_string(),
                data: text,
            })),
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "Event stream WebSocket closed");
                None
            }
            // Binary, ping and pong frames carry no envelopes.
            Ok(_) => None,
            Err(e) => Some(Err(StreamError::Transport(e.to_string()))),
        };
        futures::future::ready(item)
    });

    Ok(Box::pin(frames))
}
