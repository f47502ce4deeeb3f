//! The [`Session`]: one daemon, one message cache, one lifecycle.
//!
//! A session owns the engine and the store, runs the event bridge between
//! them, and publishes its [`AppPhase`]. Operations are split across the
//! [`commands`](crate::commands) modules as further `impl Session` blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use courier_rpc::{RpcClient, RpcError};
use courier_store::{Database, StoreEvent};

use crate::bridge::Bridge;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::SessionEvent;
use crate::state::AppPhase;

const SESSION_EVENT_CAPACITY: usize = 256;

pub struct Session {
    pub(crate) config: ClientConfig,
    pub(crate) rpc: Arc<RpcClient>,
    pub(crate) db: Arc<Mutex<Database>>,
    pub(crate) phase: Arc<watch::Sender<AppPhase>>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) stopping: Arc<AtomicBool>,
    bridge: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Build a session from configuration: validates it, opens the message
    /// cache and prepares (but does not start) the daemon.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let db = match &config.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::open_default()?,
        };
        let rpc = RpcClient::new(config.daemon_config());
        Ok(Self::with_parts(config, rpc, db))
    }

    /// Assemble a session from an existing engine and store.
    pub fn with_parts(config: ClientConfig, rpc: RpcClient, db: Database) -> Self {
        let (phase, _) = watch::channel(AppPhase::Loading);
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            config,
            rpc: Arc::new(rpc),
            db: Arc::new(Mutex::new(db)),
            phase: Arc::new(phase),
            events,
            stopping: Arc::new(AtomicBool::new(false)),
            bridge: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> AppPhase {
        self.phase.borrow().clone()
    }

    /// Follow lifecycle phase changes.
    pub fn watch_phase(&self) -> watch::Receiver<AppPhase> {
        self.phase.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Follow message cache changes.
    pub fn subscribe_store(&self) -> Result<broadcast::Receiver<StoreEvent>, ClientError> {
        Ok(self.lock_db()?.subscribe())
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the daemon and decide where the user lands: chat when an
    /// account is already linked, the link flow otherwise.
    ///
    /// Starting a session whose daemon is already running fails with
    /// [`RpcError::AlreadyRunning`] and leaves the phase untouched.
    pub async fn start(&self) -> Result<(), ClientError> {
        if self.rpc.is_running() {
            return Err(RpcError::AlreadyRunning.into());
        }
        self.set_phase(AppPhase::Loading);
        self.spawn_bridge();

        match self.rpc.start().await {
            Ok(()) => {}
            Err(RpcError::AlreadyRunning) => return Err(RpcError::AlreadyRunning.into()),
            Err(e) => return Err(self.fail(e.into())),
        }

        let accounts = self.list_accounts().await.map_err(|e| self.fail(e))?;
        if accounts.is_empty() {
            info!("No linked account, starting device link");
            return self.link_device().await;
        }

        info!(accounts = accounts.len(), "Account linked, entering chat");
        self.set_phase(AppPhase::Chat);
        Ok(())
    }

    /// Stop the daemon and close the message cache. Failures of operations
    /// still in flight are expected and not reported.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down session");

        self.rpc.stop().await?;

        if let Some(handle) = self.lock_bridge().take() {
            handle.abort();
        }

        self.lock_db()?.close()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals shared by the command modules
    // ------------------------------------------------------------------

    pub(crate) fn set_phase(&self, phase: AppPhase) {
        if self.is_stopping() {
            return;
        }
        self.phase.send_replace(phase);
    }

    /// Record a failed step as a link error unless it only failed because
    /// the session is stopping. Returns the error for propagation.
    pub(crate) fn fail(&self, err: ClientError) -> ClientError {
        if !self.is_stopping() && !err.is_shutdown() {
            warn!(error = %err, "Session step failed");
            self.set_phase(AppPhase::link_error(err.to_string()));
        }
        err
    }

    pub(crate) fn lock_db(&self) -> Result<MutexGuard<'_, Database>, ClientError> {
        self.db.lock().map_err(|_| ClientError::Lock)
    }

    fn lock_bridge(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.bridge.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe before the engine starts so no early event is missed.
    fn spawn_bridge(&self) {
        let mut slot = self.lock_bridge();
        if slot.is_some() {
            return;
        }
        let bridge = Bridge {
            db: self.db.clone(),
            phase: self.phase.clone(),
            events: self.events.clone(),
            stopping: self.stopping.clone(),
        };
        *slot = Some(bridge.spawn(self.rpc.subscribe_ordered()));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_bridge().take() {
            handle.abort();
        }
    }
}
