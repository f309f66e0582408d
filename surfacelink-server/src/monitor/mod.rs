//! Connection monitor
//!
//! Periodically reclaims idle connections and reports commands that have
//! held the privileged thread longer than the command timeout. Outbound
//! links and their retry policy live in [`retry`].

mod retry;

pub use retry::{ConnectFuture, LinkStatus, OutboundSupervisor, RetryPolicy};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::executor::{CommandId, ExecutionQueue};
use crate::registry::{ConnectionId, ConnectionPhase, ConnectionRegistry};

/// A command that has been executing for too long
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledCommand {
    pub id: CommandId,
    pub command_type: String,
    pub running_for: Duration,
}

/// Outcome of one monitor pass
#[derive(Debug, Default)]
pub struct MonitorReport {
    pub reclaimed: Vec<ConnectionId>,
    pub stalled: Option<StalledCommand>,
}

/// Periodic connection and queue health check
pub struct ConnectionMonitor {
    registry: Arc<ConnectionRegistry>,
    queue: ExecutionQueue,
    idle_timeout: Option<Duration>,
    command_timeout: Duration,
    interval: Duration,
    /// Last command reported as stalled, so each stall is logged once
    last_stalled: Option<CommandId>,
}

impl ConnectionMonitor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        queue: ExecutionQueue,
        idle_timeout: Option<Duration>,
        command_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            queue,
            idle_timeout,
            command_timeout,
            interval,
            last_stalled: None,
        }
    }

    /// Run one pass as of `now`
    pub fn check(&mut self, now: Instant) -> MonitorReport {
        let mut report = MonitorReport::default();

        if let Some(limit) = self.idle_timeout {
            // Act on a snapshot so no map lock is held while closing
            for conn in self.registry.snapshot() {
                if conn.phase != ConnectionPhase::Established || conn.busy {
                    continue;
                }
                let idle = conn.idle_for(now);
                if idle > limit && self.registry.request_close(conn.id) {
                    info!(
                        connection_id = %conn.id,
                        peer = %conn.peer,
                        idle_ms = idle.as_millis() as u64,
                        "Reclaiming idle connection"
                    );
                    report.reclaimed.push(conn.id);
                }
            }
        }

        match self.queue.stats().executing {
            Some(cmd) => {
                let running_for = now.saturating_duration_since(cmd.started_at);
                if running_for > self.command_timeout {
                    if self.last_stalled != Some(cmd.id) {
                        warn!(
                            command_id = %cmd.id,
                            command_type = %cmd.command_type,
                            elapsed_ms = running_for.as_millis() as u64,
                            "Command is stalling the privileged thread"
                        );
                        self.last_stalled = Some(cmd.id);
                    }
                    report.stalled = Some(StalledCommand {
                        id: cmd.id,
                        command_type: cmd.command_type,
                        running_for,
                    });
                }
            }
            None => self.last_stalled = None,
        }

        report
    }

    /// Run on an interval until shutdown
    pub fn spawn(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = self.check(Instant::now());
                        if !report.reclaimed.is_empty() {
                            debug!(count = report.reclaimed.len(), "Reclaimed idle connections");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown signal received, stopping connection monitor");
                        break;
                    }
                }
            }
        })
    }
}
