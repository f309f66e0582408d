//! Bridge assembly and lifecycle

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use surfacelink_utils::Result;

use crate::catalog::CatalogCache;
use crate::commands::register_builtin;
use crate::config::BridgeConfig;
use crate::dispatch::Dispatcher;
use crate::executor::{ExecutionQueue, PrivilegedExecutor, QueueOptions};
use crate::host::{Host, HostContext};
use crate::monitor::{ConnectionMonitor, LinkStatus, OutboundSupervisor, RetryPolicy};
use crate::registry::ConnectionRegistry;
use crate::tcp::{bind_listener, run_tcp_accept_loop};

/// How long shutdown waits for each background task
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// State shared by every connection task
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<BridgeConfig>,
    pub queue: ExecutionQueue,
    pub dispatcher: Arc<Dispatcher>,
    pub catalog: Arc<CatalogCache>,
    pub registry: Arc<ConnectionRegistry>,
    /// Broadcast channel for shutdown signal
    pub shutdown_tx: broadcast::Sender<()>,
}

impl SharedState {
    /// Build the shared state with the built-in commands plus `register`
    ///
    /// The returned executor is not running yet.
    pub fn new<F>(config: BridgeConfig, register: F) -> (Self, PrivilegedExecutor)
    where
        F: FnOnce(&mut Dispatcher),
    {
        let (queue, executor) = ExecutionQueue::new(QueueOptions {
            default_timeout: config.transport.command_timeout(),
        });
        let catalog = Arc::new(CatalogCache::new(queue.clone()));
        let registry = Arc::new(ConnectionRegistry::new());

        let mut dispatcher = Dispatcher::new();
        register_builtin(&mut dispatcher, &queue, &registry);
        register(&mut dispatcher);

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Self {
            config: Arc::new(config),
            queue,
            dispatcher: Arc::new(dispatcher),
            catalog,
            registry,
            shutdown_tx,
        };
        (state, executor)
    }

    /// Subscribe to shutdown signal
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

/// A running bridge
pub struct BridgeServer {
    state: SharedState,
    local_addr: SocketAddr,
    executor_thread: Option<std::thread::JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
    links: Vec<(String, watch::Receiver<LinkStatus>)>,
}

impl BridgeServer {
    /// Start the bridge with the built-in commands
    pub async fn start<H: Host>(config: BridgeConfig, host: H) -> Result<Self> {
        Self::start_with(config, host, |_| {}).await
    }

    /// Start the bridge, registering extra commands first
    pub async fn start_with<H, F>(config: BridgeConfig, host: H, register: F) -> Result<Self>
    where
        H: Host,
        F: FnOnce(&mut Dispatcher),
    {
        let (state, executor) = SharedState::new(config, register);
        let transport = &state.config.transport;

        let listener = bind_listener(&transport.bind_addr()).await?;
        let local_addr = listener.local_addr()?;

        let ctx = HostContext::new(Box::new(host), Arc::clone(&state.catalog));
        let executor_thread = executor.spawn(ctx)?;

        let mut tasks = vec![tokio::spawn(run_tcp_accept_loop(listener, state.clone()))];

        let monitor = ConnectionMonitor::new(
            Arc::clone(&state.registry),
            state.queue.clone(),
            transport.idle_timeout(),
            transport.command_timeout(),
            transport.monitor_interval(),
        );
        tasks.push(monitor.spawn(state.subscribe_shutdown()));

        let policy = RetryPolicy::from_transport(transport);
        let mut links = Vec::new();
        for addr in &transport.outbound {
            let supervisor = OutboundSupervisor::tcp(addr.clone(), policy.clone());
            links.push((addr.clone(), supervisor.status()));
            tasks.push(tokio::spawn(supervisor.run(state.clone())));
        }

        info!(
            addr = %local_addr,
            commands = state.dispatcher.command_names().len(),
            outbound = links.len(),
            "Bridge started"
        );

        Ok(Self {
            state,
            local_addr,
            executor_thread: Some(executor_thread),
            tasks,
            links,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Status of the outbound link to `addr`
    pub fn link_status(&self, addr: &str) -> Option<watch::Receiver<LinkStatus>> {
        self.links
            .iter()
            .find(|(a, _)| a == addr)
            .map(|(_, rx)| rx.clone())
    }

    /// Stop accepting, close connections, drain the queue and tear down the host
    pub async fn shutdown(mut self) {
        info!("Shutting down bridge");
        let _ = self.state.shutdown_tx.send(());
        self.state.registry.close_all();
        self.state.queue.shutdown();

        for task in self.tasks.drain(..) {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("Background task did not stop within {:?}", SHUTDOWN_GRACE);
            }
        }

        if let Some(thread) = self.executor_thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                _ => error!("Privileged executor thread panicked"),
            }
        }

        info!("Bridge stopped");
    }
}
