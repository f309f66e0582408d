//! Execution queue
//!
//! The host may only be touched from one privileged thread. Any task can
//! enqueue a job; the [`PrivilegedExecutor`] runs jobs one at a time, in
//! enqueue order, on that thread. Callers wait on a [`Ticket`] with a
//! timeout. A job whose caller stopped waiting still runs, and its result
//! is dropped.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use surfacelink_utils::{BridgeError, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::host::HostContext;
use crate::registry::ConnectionId;

/// Name of the privileged thread when spawned by the bridge
pub const PRIVILEGED_THREAD_NAME: &str = "surfacelink-host";

/// Identifier of a queued command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(u64);

impl CommandId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cmd-{}", self.0)
    }
}

type Job = Box<dyn FnOnce(&mut HostContext) + Send + 'static>;

struct PendingCommand {
    id: CommandId,
    command_type: String,
    origin: Option<ConnectionId>,
    enqueued_at: Instant,
    job: Job,
}

enum QueueMessage {
    Run(PendingCommand),
    Shutdown,
}

/// The command currently running on the privileged thread
#[derive(Debug, Clone)]
pub struct InFlight {
    pub id: CommandId,
    pub command_type: String,
    pub origin: Option<ConnectionId>,
    pub started_at: Instant,
}

/// Queue statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Commands waiting to run
    pub depth: usize,
    /// Commands run to completion since start
    pub executed: u64,
    pub shutting_down: bool,
    pub executing: Option<InFlight>,
}

#[derive(Default)]
struct QueueShared {
    shutting_down: AtomicBool,
    next_id: AtomicU64,
    depth: AtomicUsize,
    executed: AtomicU64,
    current: Mutex<Option<InFlight>>,
}

/// Queue construction options
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Wait limit used by [`ExecutionQueue::submit`] when none is given
    pub default_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
        }
    }
}

/// Handle for enqueueing host work; cheap to clone
#[derive(Clone)]
pub struct ExecutionQueue {
    tx: mpsc::UnboundedSender<QueueMessage>,
    shared: Arc<QueueShared>,
    default_timeout: Duration,
}

impl ExecutionQueue {
    /// Create a queue and the executor that drains it
    pub fn new(options: QueueOptions) -> (Self, PrivilegedExecutor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(QueueShared {
            next_id: AtomicU64::new(1),
            ..Default::default()
        });

        let queue = Self {
            tx,
            shared: Arc::clone(&shared),
            default_timeout: options.default_timeout,
        };
        (queue, PrivilegedExecutor { rx, shared })
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Append a job to the queue without waiting
    ///
    /// Never blocks. Fails with `ShuttingDown` once shutdown has begun.
    pub fn enqueue<T, F>(
        &self,
        command_type: impl Into<String>,
        origin: Option<ConnectionId>,
        f: F,
    ) -> Result<Ticket<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut HostContext) -> Result<T> + Send + 'static,
    {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(BridgeError::ShuttingDown);
        }

        let id = CommandId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let command_type = command_type.into();
        let (result_tx, result_rx) = oneshot::channel();

        let job_type = command_type.clone();
        let job: Job = Box::new(move |ctx: &mut HostContext| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| f(ctx)))
                .unwrap_or_else(|payload| {
                    let reason = panic_message(payload.as_ref());
                    error!(command_id = %id, command_type = %job_type, %reason, "Command panicked");
                    Err(BridgeError::command(format!("command panicked: {}", reason)))
                });
            if result_tx.send(result).is_err() {
                debug!(command_id = %id, command_type = %job_type, "Caller stopped waiting, discarding result");
            }
        });

        self.shared.depth.fetch_add(1, Ordering::SeqCst);
        let pending = PendingCommand {
            id,
            command_type: command_type.clone(),
            origin,
            enqueued_at: Instant::now(),
            job,
        };
        if self.tx.send(QueueMessage::Run(pending)).is_err() {
            self.shared.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(BridgeError::ShuttingDown);
        }

        debug!(command_id = %id, command_type = %command_type, ?origin, "Enqueued command");
        Ok(Ticket {
            id,
            command_type,
            rx: result_rx,
        })
    }

    /// Enqueue a job and wait for its result
    ///
    /// `timeout` falls back to the queue default.
    pub async fn submit<T, F>(
        &self,
        command_type: impl Into<String>,
        origin: Option<ConnectionId>,
        timeout: Option<Duration>,
        f: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut HostContext) -> Result<T> + Send + 'static,
    {
        let ticket = self.enqueue(command_type, origin, f)?;
        ticket.wait(timeout.unwrap_or(self.default_timeout)).await
    }

    /// Stop accepting work
    ///
    /// Commands still queued fail with `ShuttingDown`. The command that is
    /// running finishes, then the host is torn down and the executor exits.
    pub fn shutdown(&self) {
        if !self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Execution queue shutting down");
            let _ = self.tx.send(QueueMessage::Shutdown);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.shared.depth.load(Ordering::SeqCst),
            executed: self.shared.executed.load(Ordering::SeqCst),
            shutting_down: self.is_shutting_down(),
            executing: self.shared.current.lock().clone(),
        }
    }
}

impl std::fmt::Debug for ExecutionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionQueue")
            .field("depth", &self.shared.depth.load(Ordering::SeqCst))
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

/// Pending result of an enqueued command
#[must_use = "a ticket does nothing unless waited on"]
pub struct Ticket<T> {
    id: CommandId,
    command_type: String,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Ticket<T> {
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Wait up to `timeout` for the result
    ///
    /// On timeout the command is not cancelled; it runs when its turn comes
    /// and the result is discarded.
    pub async fn wait(self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            // Dropped without running: rejected during shutdown
            Ok(Err(_)) => Err(BridgeError::ShuttingDown),
            Err(_) => {
                warn!(
                    command_id = %self.id,
                    command_type = %self.command_type,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for command result"
                );
                Err(BridgeError::Timeout {
                    millis: timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Consumer side of the queue; owns the host while running
pub struct PrivilegedExecutor {
    rx: mpsc::UnboundedReceiver<QueueMessage>,
    shared: Arc<QueueShared>,
}

impl PrivilegedExecutor {
    /// Run the executor on the calling thread until shutdown
    ///
    /// The calling thread becomes the privileged thread. It must not be a
    /// tokio runtime worker.
    pub fn run(mut self, mut ctx: HostContext) {
        ctx.host_mut().on_start();
        info!(host = ctx.host().name(), "Privileged executor started");

        while let Some(message) = self.rx.blocking_recv() {
            match message {
                QueueMessage::Run(command) => {
                    self.shared.depth.fetch_sub(1, Ordering::SeqCst);
                    if self.shared.shutting_down.load(Ordering::SeqCst) {
                        reject(command);
                    } else {
                        self.execute(command, &mut ctx);
                    }
                }
                QueueMessage::Shutdown => break,
            }
        }

        self.rx.close();
        while let Ok(message) = self.rx.try_recv() {
            if let QueueMessage::Run(command) = message {
                self.shared.depth.fetch_sub(1, Ordering::SeqCst);
                reject(command);
            }
        }

        ctx.host_mut().teardown();
        info!(
            executed = self.shared.executed.load(Ordering::SeqCst),
            "Privileged executor stopped"
        );
    }

    /// Run the executor on a dedicated named thread
    pub fn spawn(self, ctx: HostContext) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(PRIVILEGED_THREAD_NAME.into())
            .spawn(move || self.run(ctx))
    }

    fn execute(&self, command: PendingCommand, ctx: &mut HostContext) {
        let started_at = Instant::now();
        let queued_ms = started_at.duration_since(command.enqueued_at).as_millis() as u64;

        *self.shared.current.lock() = Some(InFlight {
            id: command.id,
            command_type: command.command_type.clone(),
            origin: command.origin,
            started_at,
        });
        debug!(command_id = %command.id, command_type = %command.command_type, queued_ms, "Executing command");

        (command.job)(ctx);

        *self.shared.current.lock() = None;
        self.shared.executed.fetch_add(1, Ordering::SeqCst);
        debug!(
            command_id = %command.id,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Command finished"
        );
    }
}

/// Drop a queued command unrun; its waiter sees `ShuttingDown`
fn reject(command: PendingCommand) {
    debug!(command_id = %command.id, command_type = %command.command_type, "Rejecting queued command during shutdown");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogCache;
    use crate::host::{HostContext, StaticCatalogHost};
    use std::sync::atomic::AtomicUsize;

    fn start(default_timeout: Duration) -> (ExecutionQueue, JoinHandle<()>) {
        let (queue, executor) = ExecutionQueue::new(QueueOptions { default_timeout });
        let cache = Arc::new(CatalogCache::new(queue.clone()));
        let ctx = HostContext::new(Box::new(StaticCatalogHost::builtin()), cache);
        let thread = executor.spawn(ctx).unwrap();
        (queue, thread)
    }

    #[tokio::test]
    async fn test_submit_returns_result() {
        let (queue, thread) = start(Duration::from_secs(1));

        let name = queue
            .submit("host_name", None, None, |ctx| Ok(ctx.host().name().to_string()))
            .await
            .unwrap();
        assert_eq!(name, "static-catalog");

        queue.shutdown();
        thread.join().unwrap();
    }

    #[tokio::test]
    async fn test_jobs_run_on_privileged_thread() {
        let (queue, thread) = start(Duration::from_secs(1));

        let name = queue
            .submit("thread_name", None, None, |_| {
                Ok(std::thread::current().name().map(String::from))
            })
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some(PRIVILEGED_THREAD_NAME));

        queue.shutdown();
        thread.join().unwrap();
    }

    #[tokio::test]
    async fn test_handler_error_is_returned() {
        let (queue, thread) = start(Duration::from_secs(1));

        let result: Result<()> = queue
            .submit("fails", None, None, |_| Err(BridgeError::command("no track 9")))
            .await;
        assert_eq!(result.unwrap_err().to_string(), "no track 9");

        queue.shutdown();
        thread.join().unwrap();
    }

    #[tokio::test]
    async fn test_fifo_order_single_producer() {
        let (queue, thread) = start(Duration::from_secs(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        let tickets: Vec<_> = (0..20)
            .map(|i| {
                let order = Arc::clone(&order);
                queue
                    .enqueue("record", None, move |_| {
                        order.lock().push(i);
                        Ok(())
                    })
                    .unwrap()
            })
            .collect();
        for ticket in tickets {
            ticket.wait(Duration::from_secs(1)).await.unwrap();
        }

        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
        queue.shutdown();
        thread.join().unwrap();
    }

    #[tokio::test]
    async fn test_timeout_discards_late_result_and_queue_continues() {
        let (queue, thread) = start(Duration::from_secs(1));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let slow: Result<()> = queue
            .submit("slow", None, Some(Duration::from_millis(50)), move |_| {
                std::thread::sleep(Duration::from_millis(200));
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(slow, Err(BridgeError::Timeout { millis: 50 })));

        // The slow job still completes and the next one is served after it
        let next = queue.submit("next", None, None, |_| Ok(7)).await.unwrap();
        assert_eq!(next, 7);
        assert!(finished.load(Ordering::SeqCst));

        queue.shutdown();
        thread.join().unwrap();
    }

    #[tokio::test]
    async fn test_job_queued_after_caller_gave_up_still_runs() {
        let (queue, thread) = start(Duration::from_secs(1));
        let ran = Arc::new(AtomicUsize::new(0));

        let blocker = queue
            .enqueue("blocker", None, |_| {
                std::thread::sleep(Duration::from_millis(100));
                Ok(())
            })
            .unwrap();
        let counter = Arc::clone(&ran);
        let abandoned = queue
            .enqueue("abandoned", None, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        drop(abandoned);

        blocker.wait(Duration::from_secs(1)).await.unwrap();
        queue.submit("barrier", None, None, |_| Ok(())).await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        queue.shutdown();
        thread.join().unwrap();
    }

    #[tokio::test]
    async fn test_panicking_job_reports_error_and_executor_survives() {
        let (queue, thread) = start(Duration::from_secs(1));

        let result: Result<()> = queue
            .submit("boom", None, None, |_| panic!("host exploded"))
            .await;
        let message = result.unwrap_err().to_string();
        assert!(message.contains("host exploded"), "{}", message);

        assert_eq!(queue.submit("after", None, None, |_| Ok(1)).await.unwrap(), 1);
        queue.shutdown();
        thread.join().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_queued_and_new_commands() {
        let (queue, thread) = start(Duration::from_secs(2));
        let ran = Arc::new(AtomicUsize::new(0));

        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let running = queue
            .enqueue("running", None, move |_| {
                let _ = started_tx.send(());
                std::thread::sleep(Duration::from_millis(100));
                Ok("done")
            })
            .unwrap();
        let counter = Arc::clone(&ran);
        let queued = queue
            .enqueue("queued", None, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("ran")
            })
            .unwrap();

        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        queue.shutdown();

        assert_eq!(running.wait(Duration::from_secs(1)).await.unwrap(), "done");
        assert!(matches!(
            queued.wait(Duration::from_secs(1)).await,
            Err(BridgeError::ShuttingDown)
        ));
        assert!(matches!(
            queue.enqueue("late", None, |_| Ok(())),
            Err(BridgeError::ShuttingDown)
        ));

        thread.join().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stats_track_depth_and_in_flight() {
        let (queue, thread) = start(Duration::from_secs(1));
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let held = queue
            .enqueue("held", None, move |_| {
                let _ = started_tx.send(());
                let _ = release_rx.recv_timeout(Duration::from_secs(2));
                Ok(())
            })
            .unwrap();
        let waiting = queue.enqueue("waiting", None, |_| Ok(())).unwrap();
        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let stats = queue.stats();
        assert_eq!(stats.depth, 1);
        assert_eq!(
            stats.executing.map(|c| c.command_type),
            Some("held".to_string())
        );

        release_tx.send(()).unwrap();
        held.wait(Duration::from_secs(1)).await.unwrap();
        waiting.wait(Duration::from_secs(1)).await.unwrap();

        let stats = queue.stats();
        assert_eq!(stats.depth, 0);
        assert_eq!(stats.executed, 2);
        assert!(stats.executing.is_none());

        queue.shutdown();
        thread.join().unwrap();
    }
}
