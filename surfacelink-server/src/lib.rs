//! surfacelink-server: command bridge for a single-threaded host
//!
//! Socket clients send JSON commands; each command is validated, queued and
//! executed on the one thread allowed to call the host, and the result goes
//! back on the same connection.
//!
//! The pieces, bottom up:
//! - [`executor`]: FIFO queue drained by the privileged thread
//! - [`catalog`]: path-keyed cache of slow host enumerations
//! - [`dispatch`] and [`commands`]: command table and built-in commands
//! - [`connection`], [`tcp`]: per-socket request loop and accept loop
//! - [`monitor`]: idle reclamation, stall reports and outbound retry
//! - [`server`]: wires everything together

pub mod catalog;
pub mod commands;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod executor;
pub mod host;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod tcp;

pub use catalog::{CatalogCache, CatalogPath};
pub use config::{BridgeConfig, ConfigLoader, TransportConfig};
pub use dispatch::{CommandSpec, Dispatcher, ParamKind, ParamSchema};
pub use executor::{ExecutionQueue, PrivilegedExecutor, QueueOptions, QueueStats, Ticket};
pub use host::{Host, HostContext, StaticCatalogHost};
pub use monitor::{LinkStatus, OutboundSupervisor, RetryPolicy};
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionRole};
pub use server::{BridgeServer, SharedState};
