//! TCP listener and accept loop

use tokio::net::TcpListener;
use tracing::{debug, error, info};

use surfacelink_utils::{BridgeError, Result};

use crate::connection::handle_connection;
use crate::registry::ConnectionRole;
use crate::server::SharedState;

/// Bind the listener
///
/// Failure here is fatal to startup.
pub async fn bind_listener(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind TCP listener to {}: {}", addr, e);
        BridgeError::Io(e)
    })?;
    if let Ok(local) = listener.local_addr() {
        info!("TCP listener bound to {}", local);
    }
    Ok(listener)
}

/// Run the TCP accept loop until shutdown
pub async fn run_tcp_accept_loop(listener: TcpListener, shared_state: SharedState) {
    let mut shutdown_rx = shared_state.subscribe_shutdown();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!("New TCP connection from {}", peer_addr);
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
                        }
                        let state_clone = shared_state.clone();
                        tokio::spawn(async move {
                            handle_connection(
                                stream,
                                peer_addr.to_string(),
                                ConnectionRole::Inbound,
                                0,
                                state_clone,
                            )
                            .await;
                        });
                    }
                    Err(e) => {
                        // Per-connection failures (e.g. fd exhaustion) do not stop the listener
                        error!("TCP accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping TCP accept loop");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::server::SharedState;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tcp_listener_binds_and_stops() {
        let (shared_state, _executor) = SharedState::new(BridgeConfig::default(), |_| {});
        let listener = bind_listener("127.0.0.1:0").await.unwrap();

        let state = shared_state.clone();
        let handle = tokio::spawn(async move {
            run_tcp_accept_loop(listener, state).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = shared_state.shutdown_tx.send(());

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "TCP listener did not shut down");
    }

    #[tokio::test]
    async fn test_bind_failure_is_error() {
        let first = bind_listener("127.0.0.1:0").await.unwrap();
        let addr = first.local_addr().unwrap().to_string();
        assert!(matches!(bind_listener(&addr).await, Err(BridgeError::Io(_))));
    }
}
