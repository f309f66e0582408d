//! Simple request/response client for the bridge protocol
//!
//! The bridge answers each request with exactly one response, in order, so
//! the client never has more than one request outstanding.

use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use surfacelink_protocol::{ClientCodec, CodecError, Decoded, Request, Response};
use surfacelink_utils::{BridgeError, Result};

/// Timeout for server responses
///
/// Longer than the bridge's default command timeout so the bridge's own
/// timeout error arrives first.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);

/// Fixed-count connection retry
#[derive(Debug, Clone)]
pub struct ConnectRetry {
    pub attempts: u32,
    pub delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Client for one bridge connection
pub struct Client {
    framed: Framed<TcpStream, ClientCodec>,
    addr: String,
    response_timeout: Duration,
}

impl Client {
    /// Connect to `addr` (`host:port`)
    pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<Self> {
        let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(BridgeError::ConnectionFailed {
                    addr: addr.to_string(),
                    attempts: 1,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(BridgeError::ConnectionFailed {
                    addr: addr.to_string(),
                    attempts: 1,
                    reason: format!("timed out after {:?}", connect_timeout),
                })
            }
        };
        stream.set_nodelay(true)?;
        debug!("Connected to {}", addr);

        Ok(Self {
            framed: Framed::new(stream, ClientCodec::new()),
            addr: addr.to_string(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        })
    }

    /// Connect, retrying a fixed number of times
    pub async fn connect_with_retry(addr: &str, retry: &ConnectRetry) -> Result<Self> {
        let attempts = retry.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match Self::connect(addr, retry.connect_timeout).await {
                Ok(client) => return Ok(client),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    last_error = match e {
                        BridgeError::ConnectionFailed { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    if attempt < attempts {
                        warn!(
                            "Connection attempt {} failed: {} (retrying in {:?})",
                            attempt, last_error, retry.delay
                        );
                        tokio::time::sleep(retry.delay).await;
                    }
                }
            }
        }

        Err(BridgeError::ConnectionFailed {
            addr: addr.to_string(),
            attempts,
            reason: last_error,
        })
    }

    /// Set how long to wait for each response
    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send a request without waiting
    pub async fn send(&mut self, request: Request) -> Result<()> {
        self.framed.send(request).await.map_err(codec_error)
    }

    /// Receive the next response
    pub async fn recv(&mut self) -> Result<Response> {
        match timeout(self.response_timeout, self.framed.next()).await {
            Ok(Some(Ok(Decoded::Message(response)))) => Ok(response),
            Ok(Some(Ok(Decoded::Malformed(reason)))) => Err(BridgeError::MalformedMessage(reason)),
            Ok(Some(Err(e))) => Err(codec_error(e)),
            Ok(None) => Err(BridgeError::ConnectionClosed),
            Err(_) => Err(BridgeError::Timeout {
                millis: self.response_timeout.as_millis() as u64,
            }),
        }
    }

    /// Send a command and wait for its response
    pub async fn request(&mut self, command_type: &str, params: Value) -> Result<Response> {
        self.send(Request::with_params(command_type, params)).await?;
        self.recv().await
    }

    /// Round-trip a `ping`
    pub async fn ping(&mut self) -> Result<Duration> {
        let started = Instant::now();
        match self.request("ping", Value::Null).await? {
            Response::Success { .. } => Ok(started.elapsed()),
            Response::Error { message } => Err(BridgeError::CommandFailed(message)),
        }
    }
}

fn codec_error(e: CodecError) -> BridgeError {
    match e {
        CodecError::Io(e) => BridgeError::Io(e),
        CodecError::Json(e) => BridgeError::MalformedMessage(e.to_string()),
        CodecError::MessageTooLarge { size, max } => BridgeError::MessageTooLarge { size, max },
    }
}
