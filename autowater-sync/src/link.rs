//! Device link: connection lifecycle over an abstract transport.
//!
//! [`Transport`] is the seam for the actual radio (BLE, serial, the
//! in-process [`crate::sim`] controller). [`DeviceLink`] wraps one transport,
//! owns the [`ConnectionState`] and serializes writes so that frames never
//! interleave on the wire.
//!
//! Reconnecting is always up to the caller; the link never retries a
//! connection on its own.

use crate::error::LinkError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection state of the link. Written only by [`DeviceLink`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The last connection attempt failed.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A raw byte transport to one controller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a session.
    ///
    /// Inbound frames arrive on the returned receiver. The receiver closing
    /// means the link was lost.
    async fn open(&self) -> Result<mpsc::Receiver<Vec<u8>>, LinkError>;

    /// Writes one complete frame.
    async fn write(&self, frame: &[u8]) -> Result<(), LinkError>;

    /// Closes the current session, if any.
    async fn close(&self);
}

/// Configuration for the device link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Advertised name of the controller.
    pub device_name: String,
    /// Timeout for opening a session (ms).
    pub connect_timeout_ms: u64,
    /// Timeout for a single frame write (ms).
    pub write_timeout_ms: u64,
    /// Inbound frames buffered before the reader applies backpressure.
    pub inbound_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_name: "AutoWaterESP32".to_string(),
            connect_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            inbound_capacity: 32,
        }
    }
}

/// The single owner of the connection to a controller.
pub struct DeviceLink {
    config: LinkConfig,
    transport: Arc<dyn Transport>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    /// Bumped on every connect/disconnect so a stale reader cannot
    /// report loss of a newer session.
    session: Arc<AtomicU64>,
    lifecycle: Mutex<()>,
    write_lock: Mutex<()>,
    reader: Mutex<Option<JoinHandle<()>>>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    inbound_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLink")
            .field("device_name", &self.config.device_name)
            .field("state", &self.state())
            .finish()
    }
}

impl DeviceLink {
    /// Creates a disconnected link over `transport`.
    pub fn new(transport: Arc<dyn Transport>, config: LinkConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        Self {
            config,
            transport,
            state_tx: Arc::new(state_tx),
            session: Arc::new(AtomicU64::new(0)),
            lifecycle: Mutex::new(()),
            write_lock: Mutex::new(()),
            reader: Mutex::new(None),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
        }
    }

    /// Returns the controller's name.
    pub fn device_name(&self) -> &str {
        &self.config.device_name
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Returns a receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Identifies the current session. Changes on every connect and
    /// disconnect, so a frame written under one id was never seen by a
    /// session with another.
    pub fn session_id(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    /// Returns whether the link is connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Opens a session to the controller.
    ///
    /// A no-op when already connected. On failure the state becomes
    /// [`ConnectionState::Failed`].
    pub async fn connect(&self) -> Result<(), LinkError> {
        let _guard = self.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        info!("Connecting to {}", self.config.device_name);
        self.set_state(ConnectionState::Connecting);
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);

        let frames = match tokio::time::timeout(timeout, self.transport.open()).await {
            Ok(Ok(frames)) => frames,
            Ok(Err(e)) => {
                warn!("Connection to {} failed: {}", self.config.device_name, e);
                self.set_state(ConnectionState::Failed);
                return Err(e);
            }
            Err(_) => {
                warn!(
                    "Connection to {} timed out after {:?}",
                    self.config.device_name, timeout
                );
                self.transport.close().await;
                self.set_state(ConnectionState::Failed);
                return Err(LinkError::Timeout);
            }
        };

        let session = self.session.fetch_add(1, Ordering::SeqCst) + 1;
        let reader = self.spawn_reader(session, frames);
        if let Some(old) = self.reader.lock().await.replace(reader) {
            old.abort();
        }

        self.set_state(ConnectionState::Connected);
        info!("Connected to {}", self.config.device_name);
        Ok(())
    }

    /// Closes the session. Safe to call in any state.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        self.session.fetch_add(1, Ordering::SeqCst);
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        self.transport.close().await;

        if self.state() != ConnectionState::Disconnected {
            info!("Disconnected from {}", self.config.device_name);
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Sends one frame. Only valid while connected.
    ///
    /// A failed or timed out write counts as link loss.
    pub async fn send(&self, frame: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::Disconnected);
        }

        let _write = self.write_lock.lock().await;
        let timeout = Duration::from_millis(self.config.write_timeout_ms);
        let result = match tokio::time::timeout(timeout, self.transport.write(frame)).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::Timeout),
        };

        match result {
            Ok(()) => {
                debug!("Wrote {} byte frame", frame.len());
                Ok(())
            }
            Err(e) => {
                self.mark_lost(&e);
                Err(e)
            }
        }
    }

    /// Receives the next inbound frame, in arrival order.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.inbound_rx.lock().await.recv().await
    }

    fn spawn_reader(&self, session: u64, mut frames: mpsc::Receiver<Vec<u8>>) -> JoinHandle<()> {
        let inbound_tx = self.inbound_tx.clone();
        let state_tx = self.state_tx.clone();
        let current = self.session.clone();
        let device_name = self.config.device_name.clone();

        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if inbound_tx.send(frame).await.is_err() {
                    return;
                }
            }

            if current.load(Ordering::SeqCst) == session && record_loss(&state_tx) {
                warn!("Link to {} lost", device_name);
            }
        })
    }

    fn mark_lost(&self, cause: &LinkError) {
        if record_loss(&self.state_tx) {
            warn!("Link to {} lost during write: {}", self.config.device_name, cause);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }
}

/// `Connected -> Disconnected`; returns whether the state changed.
fn record_loss(state_tx: &watch::Sender<ConnectionState>) -> bool {
    state_tx.send_if_modified(|state| {
        let was_connected = *state == ConnectionState::Connected;
        if was_connected {
            *state = ConnectionState::Disconnected;
        }
        was_connected
    })
}
