//! Reliable socket: reconnecting connection wrapper with send buffering
//!
//! One spawned driver task owns the transport stream and serializes every
//! phase transition, the same shape as a conductor connection loop: connect,
//! flush the pending buffer, pump inbound messages, and on loss schedule the
//! next attempt after a fixed delay. The sink half of the transport lives
//! behind a mutex so callers can send without going through the driver.
//!
//! Callers never observe transport failure as data loss: payloads sent while
//! disconnected (or while a flush is draining) land in the pending store and
//! are redelivered in insertion order on the next successful open.

use bytes::Bytes;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SocketError};
use crate::payload::Outbound;
use crate::phase::{Phase, StateMachine};
use crate::store::{DurableStore, MemoryStore, PendingStore};
use crate::transport::{Connector, TransportSink, TransportStream, WsConnector};

/// Callback receiving each inbound payload.
pub type MessageHandler = Arc<dyn Fn(Bytes) + Send + Sync>;
/// Callback receiving transport errors not suppressed by the retry cycle.
pub type ErrorHandler = Arc<dyn Fn(SocketError) + Send + Sync>;
/// Zero-argument lifecycle callback.
pub type LifecycleHandler = Arc<dyn Fn() + Send + Sync>;

/// Default directory for the durable send buffer.
pub fn default_buffer_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reliable-socket")
        .join("buffer")
}

/// Construction-time configuration for [`ReliableSocket`].
pub struct SocketOptions {
    /// Buffer unsent payloads in a sled database instead of memory.
    pub use_durable_buffer: bool,
    /// Directory for the durable buffer database.
    pub buffer_dir: PathBuf,
    /// Fixed delay between reconnection attempts.
    pub reconnect_interval: Duration,
    /// Pacing delay between consecutive sends during a flush.
    pub flush_pacing: Duration,
    /// Inbound payload callback.
    pub on_message: Option<MessageHandler>,
    /// Transport error callback. Errors during automatic retry are
    /// suppressed to debug logging instead.
    pub on_error: Option<ErrorHandler>,
    /// Fired each time the connection reaches `Open`.
    pub on_open: Option<LifecycleHandler>,
    /// Fired when connectivity is lost or the socket is explicitly closed.
    pub on_close: Option<LifecycleHandler>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            use_durable_buffer: true,
            buffer_dir: default_buffer_dir(),
            reconnect_interval: Duration::from_secs(3),
            flush_pacing: Duration::from_millis(50),
            on_message: None,
            on_error: None,
            on_open: None,
            on_close: None,
        }
    }
}

/// State shared between the public handle and the driver task.
struct Shared {
    url: String,
    connector: Arc<dyn Connector>,
    store: Arc<dyn PendingStore>,
    machine: StateMachine,
    /// Live transport write half, replaced wholesale on every attempt.
    sink: Mutex<Option<Box<dyn TransportSink>>>,
    reconnect_interval: Duration,
    flush_pacing: Duration,
    on_message: Option<MessageHandler>,
    on_error: Option<ErrorHandler>,
    on_open: Option<LifecycleHandler>,
    on_close: Option<LifecycleHandler>,
}

impl Shared {
    fn report_error(&self, error: SocketError) {
        match &self.on_error {
            Some(handler) => handler(error),
            None => warn!(error = %error, "Transport error"),
        }
    }

    /// Route a normalized payload: direct send when the transport is open
    /// and no flush is draining, otherwise into the pending store.
    async fn send_or_buffer(&self, bytes: Bytes) {
        if !self.machine.is(Phase::Flushing) {
            let mut guard = self.sink.lock().await;
            if let Some(sink) = guard.as_mut() {
                if sink.is_open() {
                    match sink.send(bytes.clone()).await {
                        Ok(()) => return,
                        Err(e) => {
                            warn!(error = %e, "Direct send failed, buffering payload");
                        }
                    }
                }
            }
        }
        self.store.save(bytes).await;
    }

    /// Drain the pending store to the freshly opened transport.
    ///
    /// Runs once per successful open; a second invocation while draining
    /// returns immediately. The store is cleared even when the transport
    /// dies mid-loop — the unsent remainder is the documented loss window
    /// of the best-effort delivery model.
    async fn flush(&self) {
        if self.machine.is(Phase::Flushing) {
            return;
        }

        let entries = match self.store.get_all().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to read pending buffer, skipping flush");
                return;
            }
        };
        if entries.is_empty() {
            return;
        }

        info!(count = entries.len(), "Flushing buffered payloads");
        self.machine.set(Phase::Flushing);

        {
            let mut guard = self.sink.lock().await;
            if let Some(sink) = guard.as_mut() {
                for entry in entries {
                    if !sink.is_open() {
                        debug!("Transport closed mid-flush, remaining entries unsent");
                        break;
                    }
                    if let Err(e) = sink.send(Bytes::from(entry.payload)).await {
                        debug!(error = %e, "Flush send failed, remaining entries unsent");
                        break;
                    }
                    tokio::time::sleep(self.flush_pacing).await;
                }
            }
        }

        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear pending buffer after flush");
        }
    }
}

/// A reconnecting connection wrapper over a raw socket transport.
///
/// See the module docs for the delivery and lifecycle guarantees.
pub struct ReliableSocket {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    driver: StdMutex<Option<JoinHandle<()>>>,
}

impl ReliableSocket {
    /// Create a socket targeting `url` with the WebSocket connector and the
    /// pending store selected by `opts`.
    pub fn new(url: impl Into<String>, opts: SocketOptions) -> Self {
        let store: Arc<dyn PendingStore> = if opts.use_durable_buffer {
            Arc::new(DurableStore::new(&opts.buffer_dir))
        } else {
            Arc::new(MemoryStore::new())
        };
        Self::with_parts(url, opts, Arc::new(WsConnector), store)
    }

    /// Create a socket with an injected connector and pending store.
    pub fn with_parts(
        url: impl Into<String>,
        opts: SocketOptions,
        connector: Arc<dyn Connector>,
        store: Arc<dyn PendingStore>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            url: url.into(),
            connector,
            store,
            machine: StateMachine::new(),
            sink: Mutex::new(None),
            reconnect_interval: opts.reconnect_interval,
            flush_pacing: opts.flush_pacing,
            on_message: opts.on_message,
            on_error: opts.on_error,
            on_open: opts.on_open,
            on_close: opts.on_close,
        });
        Self {
            shared,
            shutdown_tx,
            shutdown_rx,
            driver: StdMutex::new(None),
        }
    }

    /// The currently active lifecycle phase.
    pub fn state(&self) -> Phase {
        self.shared.machine.current()
    }

    /// Register a callback fired whenever the socket enters `phase`.
    pub fn on_phase<F>(&self, phase: Phase, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.machine.subscribe(phase, handler);
    }

    /// Register a callback fired on every phase change.
    pub fn on_phase_change<F>(&self, handler: F)
    where
        F: Fn(Phase) + Send + Sync + 'static,
    {
        self.shared.machine.subscribe_any(handler);
    }

    /// Start connecting. Resolves once the pending store is initialized and
    /// the first attempt has been dispatched; a no-op unless `Closed`.
    pub async fn connect(&self) -> Result<()> {
        if !self.shared.machine.is(Phase::Closed) {
            return Ok(());
        }

        self.shared.store.init().await?;
        self.shutdown_tx.send_replace(false);
        self.shared.machine.set(Phase::Connecting);

        let shared = Arc::clone(&self.shared);
        let shutdown = self.shutdown_rx.clone();
        let handle = tokio::spawn(drive(shared, shutdown));
        *self.driver.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Send a payload, buffering it when the transport is unavailable.
    ///
    /// Returns an error only when a blob payload fails to read; transport
    /// trouble is absorbed by the pending store.
    pub async fn send(&self, payload: impl Into<Outbound>) -> Result<()> {
        let bytes = payload.into().into_bytes().await?;
        self.shared.send_or_buffer(bytes).await;
        Ok(())
    }

    /// Close the socket and stop the automatic-reconnect cycle for good.
    ///
    /// Cancels a pending retry, closes the live transport, and leaves the
    /// machine in `Closed`. Idempotent; `connect` may be called again.
    pub async fn close(&self) {
        let was_active = !self.shared.machine.is(Phase::Closed);
        self.shared.machine.set(Phase::Closed);
        self.shutdown_tx.send_replace(true);

        if let Some(handle) = self.driver.lock().unwrap().take() {
            handle.abort();
        }

        if let Some(mut sink) = self.shared.sink.lock().await.take() {
            sink.close().await;
        }

        if was_active {
            if let Some(handler) = &self.shared.on_close {
                handler();
            }
        }
    }
}

impl Drop for ReliableSocket {
    fn drop(&mut self) {
        if let Ok(mut driver) = self.driver.lock() {
            if let Some(handle) = driver.take() {
                handle.abort();
            }
        }
    }
}

/// Driver task: one connection attempt per iteration, fixed-delay retry.
async fn drive(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if shared.machine.is(Phase::Closed) {
            return;
        }

        let attempt = tokio::select! {
            result = shared.connector.connect(&shared.url) => result,
            _ = shutdown.wait_for(|stop| *stop) => return,
        };

        match attempt {
            Ok((mut sink, stream)) => {
                if shared.machine.is(Phase::Closed) {
                    // close() raced the attempt; discard the fresh transport.
                    sink.close().await;
                    return;
                }

                info!(url = %shared.url, "Transport connected");
                *shared.sink.lock().await = Some(sink);

                shared.flush().await;
                shared.machine.set(Phase::Open);
                if let Some(handler) = &shared.on_open {
                    handler();
                }

                let user_closed = read_loop(&shared, stream, &mut shutdown).await;
                *shared.sink.lock().await = None;

                if user_closed || shared.machine.is(Phase::Closed) {
                    return;
                }
                if !shared.machine.is(Phase::Reconnecting) {
                    warn!(url = %shared.url, "Transport disconnected, retrying");
                    shared.machine.set(Phase::Reconnecting);
                    if let Some(handler) = &shared.on_close {
                        handler();
                    }
                }
            }
            Err(e) => {
                if shared.machine.is(Phase::Reconnecting) {
                    debug!(error = %e, "Suppressed reconnection error");
                } else {
                    shared.report_error(e);
                    shared.machine.set(Phase::Reconnecting);
                }
            }
        }

        // Fixed-delay retry, cancelled by close(). No backoff, no cap.
        tokio::select! {
            _ = tokio::time::sleep(shared.reconnect_interval) => {}
            _ = shutdown.wait_for(|stop| *stop) => return,
        }
    }
}

/// Pump inbound payloads until the transport dies or close() is called.
/// Returns true when the shutdown signal ended the loop.
async fn read_loop(
    shared: &Shared,
    mut stream: Box<dyn TransportStream>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => return true,
            result = stream.recv() => match result {
                Ok(Some(data)) => {
                    if let Some(handler) = &shared.on_message {
                        handler(data);
                    }
                }
                Ok(None) => return false,
                Err(e) => {
                    if shared.machine.is(Phase::Reconnecting) {
                        debug!(error = %e, "Suppressed reconnection error");
                    } else {
                        shared.report_error(e);
                    }
                    return false;
                }
            }
        }
    }
}
