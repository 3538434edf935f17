//! Push event stream client.
//!
//! - [`messages`]: the `{action, payload}` envelope broadcast by the server.
//! - [`sse`]: incremental Server-Sent Events frame decoder.
//! - [`transport`]: SSE (HTTP) and WebSocket connections yielding frames.
//! - [`EventStreamClient`]: one connection per tab, fanned out to
//!   subscribers by channel.
//! - [`offline`]: health polling used by the degraded mode after the
//!   connection is lost.

pub mod messages;
pub mod offline;
pub mod sse;
pub mod stream;
pub mod transport;

pub use messages::{parse_envelope, Action, Envelope, Payload};
pub use stream::{ConnectionEvent, ConnectionState, EventStreamClient, StreamError, MESSAGE_CHANNEL};
