//! surfacelink-client: one-shot client for the surfacelink bridge
//!
//! Opens a TCP connection, sends requests one at a time and waits for the
//! matching response. Used by the `surfacelink` CLI and by integration
//! tests.

pub mod client;

pub use client::{Client, ConnectRetry, DEFAULT_RESPONSE_TIMEOUT};
