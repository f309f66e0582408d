//! Outbound links with bounded retry
//!
//! A supervisor dials one configured peer, serves the link with the regular
//! connection handler, and redials when it closes. Dialing gives up after
//! `max_retries` consecutive failed attempts, where a link dropped before it
//! answered anything also counts as failed; the failure is published on the
//! link's status channel and the supervisor stops.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{error, info, warn};

use surfacelink_utils::{BridgeError, Result};

use crate::config::TransportConfig;
use crate::connection::{handle_connection, CloseReason};
use crate::registry::ConnectionRole;
use crate::server::SharedState;

/// Future returned by a connector
pub type ConnectFuture<S> = BoxFuture<'static, io::Result<S>>;

type Connector<S> = Arc<dyn Fn(&str) -> ConnectFuture<S> + Send + Sync>;

/// Dial attempt limits and backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per dial cycle, including the first
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Limit for a single attempt
    pub connect_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_transport(transport: &TransportConfig) -> Self {
        Self {
            max_retries: transport.max_retries.max(1),
            base_delay: transport.retry_delay(),
            max_delay: transport.max_retry_delay(),
            connect_timeout: transport.connect_timeout(),
        }
    }

    /// Wait before attempt `attempt` (1-based)
    ///
    /// The first attempt is immediate; the second waits `base_delay`, and
    /// each later one doubles it up to `max_delay`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Observable state of an outbound link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Connecting { attempt: u32 },
    Connected,
    /// Retry budget exhausted; the supervisor has stopped
    Failed { attempts: u32, reason: String },
    Stopped,
}

/// Dials and serves one outbound peer
pub struct OutboundSupervisor<S> {
    addr: String,
    policy: RetryPolicy,
    connector: Connector<S>,
    status_tx: watch::Sender<LinkStatus>,
}

impl OutboundSupervisor<TcpStream> {
    /// Supervisor dialing `addr` over TCP
    pub fn tcp(addr: impl Into<String>, policy: RetryPolicy) -> Self {
        Self::with_connector(addr, policy, |addr: &str| {
            let addr = addr.to_string();
            async move {
                let stream = TcpStream::connect(&addr).await?;
                stream.set_nodelay(true)?;
                Ok::<_, io::Error>(stream)
            }
            .boxed()
        })
    }
}

impl<S> OutboundSupervisor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Supervisor using a custom connector
    pub fn with_connector<F>(addr: impl Into<String>, policy: RetryPolicy, connector: F) -> Self
    where
        F: Fn(&str) -> ConnectFuture<S> + Send + Sync + 'static,
    {
        let (status_tx, _) = watch::channel(LinkStatus::Idle);
        Self {
            addr: addr.into(),
            policy,
            connector: Arc::new(connector),
            status_tx,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Subscribe to link status changes
    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status_tx.subscribe()
    }

    /// One dial cycle
    ///
    /// Returns the stream and the number of failed attempts before it, or
    /// `ConnectionFailed` once every attempt has failed.
    pub async fn dial(&self) -> Result<(S, u32)> {
        self.dial_after(0, String::new()).await
    }

    /// Continue a dial cycle that already spent `failed` attempts
    ///
    /// Attempt numbering, and with it the backoff, picks up where the
    /// earlier failures left off.
    async fn dial_after(&self, failed: u32, mut last_error: String) -> Result<(S, u32)> {
        for attempt in failed.saturating_add(1)..=self.policy.max_retries {
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                info!(peer = %self.addr, attempt, delay_ms = delay.as_millis() as u64, "Waiting before next connection attempt");
                tokio::time::sleep(delay).await;
            }

            self.status_tx.send_replace(LinkStatus::Connecting { attempt });
            match tokio::time::timeout(self.policy.connect_timeout, (self.connector)(&self.addr)).await {
                Ok(Ok(stream)) => {
                    info!(peer = %self.addr, attempt, "Outbound connection established");
                    return Ok((stream, attempt - 1));
                }
                Ok(Err(e)) => {
                    warn!(peer = %self.addr, attempt, max = self.policy.max_retries, error = %e, "Connection attempt failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(peer = %self.addr, attempt, max = self.policy.max_retries, "Connection attempt timed out");
                    last_error = format!("timed out after {:?}", self.policy.connect_timeout);
                }
            }
        }

        let err = BridgeError::ConnectionFailed {
            addr: self.addr.clone(),
            attempts: self.policy.max_retries,
            reason: last_error.clone(),
        };
        self.status_tx.send_replace(LinkStatus::Failed {
            attempts: self.policy.max_retries,
            reason: last_error,
        });
        error!(peer = %self.addr, "{}", err);
        Err(err)
    }

    /// Dial, serve and redial until shutdown or retry exhaustion
    ///
    /// A link that closes without answering a single request counts as a
    /// failed attempt, so a peer that accepts and immediately drops keeps
    /// backing off and eventually exhausts the budget. A link that served
    /// requests, or was closed for idling, resets the budget.
    pub async fn run(self, state: SharedState) {
        let mut shutdown_rx = state.subscribe_shutdown();
        let mut failed = 0u32;
        let mut last_error = String::new();

        loop {
            let dialed = tokio::select! {
                dialed = self.dial_after(failed, std::mem::take(&mut last_error)) => dialed,
                _ = shutdown_rx.recv() => {
                    self.status_tx.send_replace(LinkStatus::Stopped);
                    return;
                }
            };
            let (stream, failed_before) = match dialed {
                Ok(dialed) => dialed,
                Err(_) => return,
            };

            self.status_tx.send_replace(LinkStatus::Connected);
            let outcome = handle_connection(
                stream,
                self.addr.clone(),
                ConnectionRole::Outbound,
                failed_before,
                state.clone(),
            )
            .await;

            if outcome.reason == CloseReason::Shutdown || state.queue.is_shutting_down() {
                self.status_tx.send_replace(LinkStatus::Stopped);
                return;
            }

            let idled = matches!(outcome.reason, CloseReason::IdleTimeout | CloseReason::Reclaimed);
            if outcome.requests_served == 0 && !idled {
                failed = failed_before + 1;
                last_error = format!("link closed before serving a request: {}", outcome.reason);
                warn!(peer = %self.addr, attempt = failed, max = self.policy.max_retries, reason = %outcome.reason, "Outbound link dropped before serving a request");
                continue;
            }

            failed = 0;
            info!(peer = %self.addr, reason = %outcome.reason, requests = outcome.requests_served, "Outbound link closed, reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(self.policy.base_delay) => {}
                _ = shutdown_rx.recv() => {
                    self.status_tx.send_replace(LinkStatus::Stopped);
                    return;
                }
            }
        }
    }
}
