//! Per-connection request loop
//!
//! Reads one frame at a time, resolves and queues the command, then writes
//! exactly one response before reading the next frame. Every request-level
//! failure becomes an error response; only transport failures, idle
//! reclamation and shutdown end the connection.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use surfacelink_protocol::{CodecError, Decoded, Request, Response, ServerCodec};
use surfacelink_utils::BridgeError;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::registry::{ConnectionId, ConnectionPhase, ConnectionRegistry, ConnectionRole};
use crate::server::SharedState;

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its end
    PeerClosed,
    /// Nothing was received within the idle timeout
    IdleTimeout,
    /// Closed by the connection monitor
    Reclaimed,
    Shutdown,
    /// The peer announced a frame over the size limit
    FrameTooLarge,
    Io(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::Reclaimed => write!(f, "reclaimed"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::FrameTooLarge => write!(f, "frame too large"),
            Self::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

/// How a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOutcome {
    pub reason: CloseReason,
    /// Requests answered before the close
    pub requests_served: u64,
}

/// Stream wrapper recording when bytes last arrived
///
/// The codec only yields complete frames; this lets the idle timer and the
/// monitor see a large frame that is still trickling in.
struct ActivityStream<S> {
    inner: S,
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl<S: AsyncRead + Unpin> AsyncRead for ActivityStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let polled = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(polled, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            self.registry.touch(self.id);
        }
        polled
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ActivityStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

type ConnFramed<S> = Framed<ActivityStream<S>, ServerCodec>;

enum Inbound {
    Frame(Option<Result<Decoded<Request>, CodecError>>),
    Idle,
}

/// Wait for the next complete frame
///
/// Idle means no bytes at all for `idle_timeout`; a partial frame that keeps
/// growing keeps the connection alive.
async fn next_frame<S>(
    framed: &mut ConnFramed<S>,
    registry: &ConnectionRegistry,
    id: ConnectionId,
    idle_timeout: Option<Duration>,
) -> Inbound
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(limit) = idle_timeout else {
        return Inbound::Frame(framed.next().await);
    };

    loop {
        let last = registry.last_activity(id).unwrap_or_else(Instant::now);
        match tokio::time::timeout_at((last + limit).into(), framed.next()).await {
            Ok(frame) => return Inbound::Frame(frame),
            Err(_) => {
                let last = registry.last_activity(id).unwrap_or(last);
                if last.elapsed() >= limit {
                    return Inbound::Idle;
                }
            }
        }
    }
}

/// Serve one connection until it closes
///
/// `retry_count` is recorded for outbound links that needed several dial
/// attempts.
pub async fn handle_connection<S>(
    stream: S,
    peer: String,
    role: ConnectionRole,
    retry_count: u32,
    state: SharedState,
) -> ConnectionOutcome
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let transport = &state.config.transport;
    let (id, close) = state.registry.register(peer.clone(), role, retry_count);
    let mut shutdown_rx = state.subscribe_shutdown();
    let codec = ServerCodec::with_max_size(transport.max_message_size);
    let stream = ActivityStream {
        inner: stream,
        registry: Arc::clone(&state.registry),
        id,
    };
    let mut framed = Framed::with_capacity(stream, codec, transport.read_buffer_size);
    let idle_timeout = transport.idle_timeout();
    let mut requests_served = 0u64;

    state.registry.advance(id, ConnectionPhase::Established);
    info!(connection_id = %id, peer = %peer, ?role, "Connection established");

    let reason = loop {
        let inbound = tokio::select! {
            _ = close.cancelled() => break CloseReason::Reclaimed,
            _ = shutdown_rx.recv() => break CloseReason::Shutdown,
            inbound = next_frame(&mut framed, &state.registry, id, idle_timeout) => inbound,
        };

        let mut answered_request = false;
        let response = match inbound {
            Inbound::Idle => break CloseReason::IdleTimeout,
            Inbound::Frame(None) => break CloseReason::PeerClosed,
            Inbound::Frame(Some(Ok(Decoded::Message(request)))) => {
                state.registry.set_busy(id, true);
                let response = process_request(&state, id, request).await;
                state.registry.set_busy(id, false);
                answered_request = true;
                response
            }
            Inbound::Frame(Some(Ok(Decoded::Malformed(reason)))) => {
                let err = BridgeError::MalformedMessage(reason);
                warn!(connection_id = %id, kind = %err.kind(), error = %err, "Malformed message");
                state.registry.touch(id);
                Response::error(err.to_string())
            }
            Inbound::Frame(Some(Err(CodecError::MessageTooLarge { size, max }))) => {
                warn!(connection_id = %id, size, max, "Inbound frame exceeds limit, closing");
                let response =
                    Response::error(BridgeError::MessageTooLarge { size, max }.to_string());
                let _ = send_response(&mut framed, id, response).await;
                break CloseReason::FrameTooLarge;
            }
            Inbound::Frame(Some(Err(e))) => {
                warn!(connection_id = %id, error = %e, "Read failed");
                break CloseReason::Io(e.to_string());
            }
        };

        if let Err(e) = send_response(&mut framed, id, response).await {
            warn!(connection_id = %id, error = %e, "Write failed");
            break CloseReason::Io(e.to_string());
        }
        if answered_request {
            requests_served += 1;
        }
        state.registry.touch(id);
    };

    state.registry.advance(id, ConnectionPhase::Draining);
    if let Err(e) = SinkExt::<Response>::close(&mut framed).await {
        debug!(connection_id = %id, error = %e, "Error while closing connection");
    }
    state.registry.advance(id, ConnectionPhase::Closed);
    info!(connection_id = %id, peer = %peer, %reason, requests_served, "Connection closed");

    ConnectionOutcome {
        reason,
        requests_served,
    }
}

async fn process_request(state: &SharedState, id: ConnectionId, request: Request) -> Response {
    let Request {
        command_type,
        params,
    } = request;
    debug!(connection_id = %id, %command_type, "Received command");

    let resolved = match state.dispatcher.dispatch(&command_type, &params) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(connection_id = %id, %command_type, kind = %e.kind(), error = %e, "Rejected command");
            return Response::error(e.to_string());
        }
    };

    let timeout = resolved.timeout;
    let name = resolved.name.clone();
    match state
        .queue
        .submit(name, Some(id), timeout, resolved.into_job())
        .await
    {
        Ok(result) => Response::success(result),
        Err(e) if e.is_request_local() => {
            warn!(connection_id = %id, %command_type, kind = %e.kind(), error = %e, "Command failed");
            Response::error(e.to_string())
        }
        Err(e) => {
            info!(connection_id = %id, %command_type, kind = %e.kind(), error = %e, "Command not executed");
            Response::error(e.to_string())
        }
    }
}

/// Write a response, replacing it with an error if it is too large to send
async fn send_response<S>(
    framed: &mut ConnFramed<S>,
    id: ConnectionId,
    response: Response,
) -> Result<(), CodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match framed.send(response).await {
        Err(CodecError::MessageTooLarge { size, max }) => {
            warn!(connection_id = %id, size, max, "Response exceeds limit, sending error instead");
            framed
                .send(Response::error(
                    BridgeError::MessageTooLarge { size, max }.to_string(),
                ))
                .await
        }
        other => other,
    }
}
