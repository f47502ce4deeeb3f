//! Daemon process ownership and request/response correlation.
//!
//! One [`RpcClient`] per session. Internally it runs up to three tokio tasks:
//! a stdout reader that frames and dispatches lines, a stderr reader that
//! forwards the daemon's diagnostics to `tracing`, and an exit watcher that
//! owns the [`Child`]. Callers only see [`RpcClient::call`] and the event
//! subscription.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use courier_shared::protocol::{classify_line, Inbound, RpcRequest};

use crate::config::DaemonConfig;
use crate::error::RpcError;
use crate::events::DaemonEvent;
use crate::framing::LineBuffer;

type Reply = Result<Value, RpcError>;
type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Size of a single stdout read.
const READ_CHUNK: usize = 8 * 1024;

/// Longest prefix of a malformed line that ends up in the logs.
const LOGGED_LINE_MAX: usize = 200;

/// How long an exited daemon's stdout may take to reach EOF before the exit
/// is published anyway.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State touched by both the caller side and the background tasks.
struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    events: broadcast::Sender<DaemonEvent>,
    ordered: Mutex<Option<mpsc::UnboundedSender<DaemonEvent>>>,
    running: AtomicBool,
    stopping: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: DaemonEvent) {
        {
            let mut ordered = self.ordered.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(tx) = ordered.as_ref() {
                if tx.send(event.clone()).is_err() {
                    *ordered = None;
                }
            }
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn complete(&self, id: u64, reply: Reply) {
        let waiter = self.lock_pending().remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!(id, "Response for unknown or expired request"),
        }
    }

    fn reject_all(&self, make_error: impl Fn() -> RpcError) {
        let drained: Vec<_> = self.lock_pending().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Rejecting outstanding requests");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(make_error()));
        }
    }

    fn dispatch_line(&self, line: &str) {
        match classify_line(line) {
            Ok(Inbound::Response { id, outcome }) => {
                self.complete(id, outcome.map_err(RpcError::from));
            }
            Ok(Inbound::Notification(envelope)) => {
                self.emit(DaemonEvent::from(envelope));
            }
            Err(e) => {
                let shown: String = line.chars().take(LOGGED_LINE_MAX).collect();
                warn!(error = %e, line = %shown, "Dropping malformed line from daemon");
            }
        }
    }

    /// The transport is gone: fail everything still waiting and publish
    /// `Close` exactly once.
    fn on_exit(&self, code: Option<i32>) {
        self.running.store(false, Ordering::SeqCst);
        self.reject_all(|| RpcError::Exit { code });
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.emit(DaemonEvent::Close(code));
        }
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

/// Where the engine gets its byte streams from.
enum Transport {
    /// Spawn `config.executable` and use its stdio.
    Spawn,
    /// Pre-connected streams, consumed by the first `start()`.
    Streams(Option<(BoxReader, BoxWriter)>),
}

/// Handles owned between `start()` and `stop()`.
#[derive(Default)]
struct Lifecycle {
    kill_tx: Option<oneshot::Sender<()>>,
    watcher: Option<JoinHandle<()>>,
    readers: Vec<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// RpcClient
// ---------------------------------------------------------------------------

/// JSON-RPC client for one daemon process.
pub struct RpcClient {
    config: DaemonConfig,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    writer: tokio::sync::Mutex<Option<BoxWriter>>,
    transport: Mutex<Transport>,
    lifecycle: Mutex<Lifecycle>,
}

impl RpcClient {
    /// Client that spawns `config.executable` on [`start`](Self::start).
    pub fn new(config: DaemonConfig) -> Self {
        Self::with_transport(config, Transport::Spawn)
    }

    /// Client that speaks over an existing pair of streams instead of a
    /// child process. End-of-stream on `reader` counts as the daemon exiting.
    pub fn from_streams<R, W>(reader: R, writer: W, config: DaemonConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_transport(
            config,
            Transport::Streams(Some((Box::new(reader), Box::new(writer)))),
        )
    }

    fn with_transport(config: DaemonConfig, transport: Transport) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                events,
                ordered: Mutex::new(None),
                running: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
            config,
            next_id: AtomicU64::new(1),
            writer: tokio::sync::Mutex::new(None),
            transport: Mutex::new(transport),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Subscribe to daemon events. Each subscriber sees every event published
    /// after it subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.shared.events.subscribe()
    }

    /// Lossless, in-order event feed for the single consumer that persists
    /// events. Unlike [`subscribe`](Self::subscribe) it never drops events
    /// when the consumer falls behind. Calling it again replaces the
    /// previous feed, which then ends.
    pub fn subscribe_ordered(&self) -> mpsc::UnboundedReceiver<DaemonEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .shared
            .ordered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);
        rx
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Number of calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.shared.lock_pending().len()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Launch the daemon and start the reader tasks.
    pub async fn start(&self) -> Result<(), RpcError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(RpcError::AlreadyRunning);
        }
        self.shared.stopping.store(false, Ordering::SeqCst);
        self.shared.closed.store(false, Ordering::SeqCst);

        let streams = {
            let mut transport = self.lock_transport();
            match &mut *transport {
                Transport::Spawn => None,
                Transport::Streams(pair) => Some(pair.take()),
            }
        };

        let result = match streams {
            None => self.spawn_process().await,
            Some(Some((reader, writer))) => {
                let stdout_task = self.attach(reader, writer, true).await;
                self.lock_lifecycle().readers.push(stdout_task);
                Ok(())
            }
            Some(None) => Err(RpcError::Startup {
                executable: "<streams>".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "stream transport already consumed",
                ),
            }),
        };

        if let Err(e) = result {
            self.shared.running.store(false, Ordering::SeqCst);
            error!(error = %e, "Daemon failed to start");
            return Err(e);
        }

        info!("Daemon ready");
        self.shared.emit(DaemonEvent::Ready);
        Ok(())
    }

    async fn spawn_process(&self) -> Result<(), RpcError> {
        let executable = self.config.executable.display().to_string();
        let startup_error = |source: std::io::Error| RpcError::Startup {
            executable: executable.clone(),
            source,
        };

        let mut child = Command::new(&self.config.executable)
            .args(self.config.command_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(startup_error)?;

        let missing = |name: &str| {
            startup_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("daemon {name} was not captured"),
            ))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        info!(
            executable = %executable,
            pid = ?child.id(),
            args = ?self.config.command_args(),
            "Daemon spawned"
        );

        let stdout_task = self.attach(Box::new(stdout), Box::new(stdin), false).await;

        let stderr_task = tokio::spawn(read_stderr(stderr));
        let (kill_tx, kill_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_exit(
            self.shared.clone(),
            child,
            kill_rx,
            stdout_task,
        ));

        let mut lifecycle = self.lock_lifecycle();
        lifecycle.readers.push(stderr_task);
        lifecycle.kill_tx = Some(kill_tx);
        lifecycle.watcher = Some(watcher);
        Ok(())
    }

    async fn attach(
        &self,
        reader: BoxReader,
        writer: BoxWriter,
        eof_is_exit: bool,
    ) -> JoinHandle<()> {
        *self.writer.lock().await = Some(writer);
        tokio::spawn(read_stdout(self.shared.clone(), reader, eof_is_exit))
    }

    /// Stop the daemon and cancel every outstanding call with
    /// [`RpcError::Stopped`]. Calling it again is a no-op.
    pub async fn stop(&self) -> Result<(), RpcError> {
        let lifecycle = std::mem::take(&mut *self.lock_lifecycle());
        if !self.is_running() && lifecycle.watcher.is_none() && lifecycle.readers.is_empty() {
            return Ok(());
        }

        info!("Stopping daemon");
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.reject_all(|| RpcError::Stopped);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        if let Some(kill_tx) = lifecycle.kill_tx {
            let _ = kill_tx.send(());
        }
        if let Some(watcher) = lifecycle.watcher {
            if let Err(e) = watcher.await {
                warn!(error = %e, "Exit watcher task failed");
            }
        }

        // Aborting the stdout reader drops its partial-line residue.
        for reader in lifecycle.readers {
            reader.abort();
        }

        // Stream transports have no exit watcher to publish Close.
        self.shared.on_exit(None);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Call `method` with the configured default deadline.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.call_with_timeout(method, params, self.config.request_timeout)
            .await
    }

    /// Call `method` and deserialize its result.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, RpcError> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Call `method`, failing with [`RpcError::Timeout`] if no response
    /// arrives within `timeout`.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        if !self.is_running() {
            return Err(RpcError::NotRunning);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = RpcRequest::new(id, method, params.as_ref()).to_line()?;

        // Register before writing so a fast response always finds its waiter.
        let (tx, rx) = oneshot::channel();
        self.shared.lock_pending().insert(id, tx);

        if let Err(e) = self.write_line(&line).await {
            self.shared.lock_pending().remove(&id);
            return Err(e);
        }
        debug!(id, method, "Request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            // Waiter dropped without an answer; only happens on teardown.
            Ok(Err(_)) => Err(RpcError::Stopped),
            Err(_) => {
                self.shared.lock_pending().remove(&id);
                warn!(id, method, ?timeout, "Request timed out");
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), RpcError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(RpcError::NotRunning)?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    fn lock_transport(&self) -> MutexGuard<'_, Transport> {
        self.transport.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn read_stdout(shared: Arc<Shared>, mut reader: BoxReader, eof_is_exit: bool) {
    let mut lines = LineBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in lines.push(&chunk[..n]) {
                    shared.dispatch_line(&line);
                }
            }
            Err(e) => {
                if !shared.is_stopping() {
                    error!(error = %e, "Failed reading daemon stdout");
                    shared.emit(DaemonEvent::Error(format!("stdout read failed: {e}")));
                }
                break;
            }
        }
    }

    if lines.pending_bytes() > 0 {
        debug!(bytes = lines.pending_bytes(), "Discarding incomplete trailing line");
    }
    debug!("Daemon stdout closed");

    if eof_is_exit {
        shared.on_exit(None);
    }
}

async fn read_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => warn!(target: "courier_rpc::daemon", "{line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Failed reading daemon stderr");
                break;
            }
        }
    }
}

/// Owns the child until it exits. The stdout reader is drained to EOF before
/// the exit is published so replies written just before exiting still reach
/// their callers.
async fn watch_exit(
    shared: Arc<Shared>,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    mut stdout_task: JoinHandle<()>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // Fires on an explicit stop and when the client is dropped.
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "Kill failed, daemon already gone");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => {
            if shared.is_stopping() {
                info!(code = ?status.code(), "Daemon stopped");
            } else {
                warn!(code = ?status.code(), "Daemon exited unexpectedly");
            }
            status.code()
        }
        Err(e) => {
            if !shared.is_stopping() {
                error!(error = %e, "Failed waiting for daemon exit");
                shared.emit(DaemonEvent::Error(format!("wait failed: {e}")));
            }
            None
        }
    };

    if shared.is_stopping() {
        stdout_task.abort();
    } else if tokio::time::timeout(EXIT_DRAIN_TIMEOUT, &mut stdout_task)
        .await
        .is_err()
    {
        debug!("Daemon stdout still open after exit, abandoning it");
        stdout_task.abort();
    }

    shared.on_exit(code);
}
