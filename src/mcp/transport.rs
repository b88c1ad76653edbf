//! Server-Sent Events transport.
//!
//! Each session owns one outbound event stream (the body of its `GET /sse` response) and
//! one inbound queue fed by `POST /messages`. Frames written with [`Outbound::send`] end up
//! on the wire in order; the stream emits a keep-alive comment while idle.

use actix_web::web::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::protocol::{JsonRpcRequest, JsonRpcResponse};
use super::session::{McpSession, SessionRegistry};

const KEEP_ALIVE_FRAME: &[u8] = b": keep-alive\n\n";

const STATE_OPENING: u8 = 0;
const STATE_ACTIVE: u8 = 1;
const STATE_CLOSED: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("stream closed")]
    StreamClosed,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Lifecycle of a session's stream. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Opening,
    Active,
    Closed,
}

/// One SSE event
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// Handshake telling the client where to post its messages
    Endpoint(String),
    /// A serialized JSON-RPC message
    Message(String),
}

impl SseFrame {
    pub fn message(response: &JsonRpcResponse) -> Result<Self, TransportError> {
        Ok(Self::Message(serde_json::to_string(response)?))
    }

    pub fn encode(&self) -> Bytes {
        let (event, data) = match self {
            Self::Endpoint(uri) => ("endpoint", uri),
            Self::Message(json) => ("message", json),
        };

        let mut frame = format!("event: {}\n", event);
        for line in data.lines() {
            frame.push_str("data: ");
            frame.push_str(line);
            frame.push('\n');
        }
        frame.push('\n');

        Bytes::from(frame)
    }
}

/// Write half of a session's event stream
#[derive(Debug, Clone)]
pub struct Outbound {
    frames: mpsc::Sender<SseFrame>,
    state: Arc<AtomicU8>,
}

impl Outbound {
    pub async fn send(&self, frame: SseFrame) -> Result<(), TransportError> {
        if self.state() == TransportState::Closed {
            return Err(TransportError::StreamClosed);
        }

        self.frames
            .send(frame)
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    pub fn state(&self) -> TransportState {
        match self.state.load(Ordering::SeqCst) {
            STATE_OPENING => TransportState::Opening,
            STATE_ACTIVE => TransportState::Active,
            _ => TransportState::Closed,
        }
    }

    /// `Opening -> Active`; false if the transport already moved on
    fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_OPENING,
                STATE_ACTIVE,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Move to `Closed`. Returns true only for the call that performed the transition.
    pub fn close(&self) -> bool {
        self.state.swap(STATE_CLOSED, Ordering::SeqCst) != STATE_CLOSED
    }
}

/// Create an outbound handle and the receiver that feeds the response body
pub fn channel(capacity: usize) -> (Outbound, mpsc::Receiver<SseFrame>) {
    let (frames, receiver) = mpsc::channel(capacity.max(1));
    let outbound = Outbound {
        frames,
        state: Arc::new(AtomicU8::new(STATE_OPENING)),
    };
    (outbound, receiver)
}

/// Removes the session from the registry when the response body is dropped,
/// which is how actix reports that the client went away.
#[derive(Debug)]
struct SessionGuard {
    id: String,
    registry: Arc<SessionRegistry>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        tracing::info!(session_id = %self.id, "SSE client disconnected");
        self.registry.close(&self.id);
    }
}

/// Response body of `GET /sse`
#[derive(Debug)]
pub struct EventStream {
    frames: mpsc::Receiver<SseFrame>,
    keep_alive: Interval,
    _guard: SessionGuard,
}

impl Stream for EventStream {
    type Item = Result<Bytes, actix_web::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.frames.poll_recv(cx) {
            Poll::Ready(Some(frame)) => {
                self.keep_alive.reset();
                return Poll::Ready(Some(Ok(frame.encode())));
            }
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => {}
        }

        match self.keep_alive.poll_tick(cx) {
            Poll::Ready(_) => Poll::Ready(Some(Ok(Bytes::from_static(KEEP_ALIVE_FRAME)))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A freshly opened session: registry entry, the receiver its protocol engine
/// reads from, and the stream to hand to actix as the response body.
pub struct OpenedSession {
    pub session: Arc<McpSession>,
    pub requests: mpsc::Receiver<JsonRpcRequest>,
    pub stream: EventStream,
}

/// Register a new session and perform the SSE handshake.
///
/// `endpoint` is the path clients post messages to; the session id is appended as the
/// `sessionId` query parameter.
pub async fn open(
    registry: &Arc<SessionRegistry>,
    endpoint: &str,
    capacity: usize,
    keep_alive: Duration,
) -> Result<OpenedSession, TransportError> {
    let (outbound, frames) = channel(capacity);
    let (inbound, requests) = mpsc::channel(capacity.max(1));
    let session = registry.open(outbound, inbound);

    let guard = SessionGuard {
        id: session.id.clone(),
        registry: registry.clone(),
    };

    let mut keep_alive = tokio::time::interval_at(Instant::now() + keep_alive, keep_alive);
    keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let stream = EventStream {
        frames,
        keep_alive,
        _guard: guard,
    };

    let endpoint = format!("{}?sessionId={}", endpoint, session.id);
    session.send(SseFrame::Endpoint(endpoint)).await?;

    if !session.outbound().activate() {
        return Err(TransportError::StreamClosed);
    }

    Ok(OpenedSession {
        session,
        requests,
        stream,
    })
}
