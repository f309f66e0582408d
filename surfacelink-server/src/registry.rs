//! Connection Registry
//!
//! Tracks every live socket, inbound and outbound, so the connection monitor
//! can find idle links and shutdown can close them all. Each record carries a
//! cancellation token the owning handler task watches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a ConnectionId from a raw value (mainly for testing)
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which side opened the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Accepted by the listener
    Inbound,
    /// Dialed by an outbound supervisor
    Outbound,
}

/// Connection lifecycle
///
/// Phases only move forward: Connecting, Established, Draining, Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionPhase {
    Connecting,
    Established,
    Draining,
    Closed,
}

/// Entry for a live connection
#[derive(Debug)]
pub struct ConnectionRecord {
    pub peer: String,
    pub role: ConnectionRole,
    pub phase: ConnectionPhase,
    pub last_activity: Instant,
    /// Failed dial attempts before this outbound link came up
    pub retry_count: u32,
    /// A request from this connection is waiting on the execution queue
    pub busy: bool,
    close: CancellationToken,
}

/// Point-in-time copy of a record, safe to inspect without holding the map
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub peer: String,
    pub role: ConnectionRole,
    pub phase: ConnectionPhase,
    pub last_activity: Instant,
    pub retry_count: u32,
    pub busy: bool,
}

impl ConnectionSnapshot {
    /// Time since the last frame was read or written
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }
}

/// Registry tracking all live connections
///
/// Thread-safe for concurrent access from handler tasks and the monitor.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionRecord>,
    next_connection_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Register a new connection in the `Connecting` phase
    ///
    /// Returns the assigned id and the token that is cancelled when the
    /// connection should be closed.
    pub fn register(
        &self,
        peer: impl Into<String>,
        role: ConnectionRole,
        retry_count: u32,
    ) -> (ConnectionId, CancellationToken) {
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::SeqCst));
        let close = CancellationToken::new();
        let now = Instant::now();
        let peer = peer.into();

        debug!(connection_id = %id, peer = %peer, ?role, "Registered connection");

        self.connections.insert(
            id,
            ConnectionRecord {
                peer,
                role,
                phase: ConnectionPhase::Connecting,
                last_activity: now,
                retry_count,
                busy: false,
                close: close.clone(),
            },
        );

        (id, close)
    }

    /// Move a connection to a later phase
    ///
    /// Moving backwards is refused. Reaching `Closed` removes the record.
    /// Returns `true` if the transition was applied.
    pub fn advance(&self, id: ConnectionId, phase: ConnectionPhase) -> bool {
        if phase == ConnectionPhase::Closed {
            return match self.connections.remove(&id) {
                Some((_, record)) => {
                    record.close.cancel();
                    debug!(connection_id = %id, "Connection closed");
                    true
                }
                None => false,
            };
        }

        match self.connections.get_mut(&id) {
            Some(mut record) if phase > record.phase => {
                record.phase = phase;
                true
            }
            Some(record) => {
                if phase < record.phase {
                    warn!(
                        connection_id = %id,
                        from = ?record.phase,
                        to = ?phase,
                        "Refusing backwards phase transition"
                    );
                }
                false
            }
            None => false,
        }
    }

    /// Record activity on a connection
    pub fn touch(&self, id: ConnectionId) {
        if let Some(mut record) = self.connections.get_mut(&id) {
            record.last_activity = Instant::now();
        }
    }

    /// When bytes last moved on a connection, `None` once closed
    pub fn last_activity(&self, id: ConnectionId) -> Option<Instant> {
        self.connections.get(&id).map(|r| r.last_activity)
    }

    /// Mark whether a connection is waiting on a command
    pub fn set_busy(&self, id: ConnectionId, busy: bool) {
        if let Some(mut record) = self.connections.get_mut(&id) {
            record.busy = busy;
            record.last_activity = Instant::now();
        }
    }

    /// Ask the owning task to close a connection
    pub fn request_close(&self, id: ConnectionId) -> bool {
        match self.connections.get(&id) {
            Some(record) => {
                record.close.cancel();
                true
            }
            None => false,
        }
    }

    /// Ask every connection to close
    pub fn close_all(&self) -> usize {
        let mut count = 0;
        for record in self.connections.iter() {
            record.close.cancel();
            count += 1;
        }
        count
    }

    /// Current phase of a connection, `None` once closed
    pub fn phase(&self, id: ConnectionId) -> Option<ConnectionPhase> {
        self.connections.get(&id).map(|r| r.phase)
    }

    /// Copy out all records
    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        let mut snapshots: Vec<_> = self
            .connections
            .iter()
            .map(|entry| {
                let record = entry.value();
                ConnectionSnapshot {
                    id: *entry.key(),
                    peer: record.peer.clone(),
                    role: record.role,
                    phase: record.phase,
                    last_activity: record.last_activity,
                    retry_count: record.retry_count,
                    busy: record.busy,
                }
            })
            .collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }

    /// Number of live connections
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Number of live connections with the given role
    pub fn count_by_role(&self, role: ConnectionRole) -> usize {
        self.connections.iter().filter(|r| r.role == role).count()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.connections.len())
            .finish()
    }
}
