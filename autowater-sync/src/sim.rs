//! In-process simulated controller.
//!
//! [`SimulatedController`] implements [`Transport`] by playing the device
//! side of the protocol: it decodes commands, keeps schedule and mode state,
//! acknowledges, and can push telemetry. Fault knobs cover the failure paths
//! the engine has to handle: an unreachable device, a connect that never
//! completes, dropped frames, a device that stops acknowledging, and link loss.

use crate::codec;
use crate::error::LinkError;
use crate::link::Transport;
use crate::protocol::{Command, DeviceSnapshot, InboundFrame, ScheduleEntry};
use async_trait::async_trait;
use autowater_types::{Plant, PlantId};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Default)]
struct ControllerState {
    auto_mode: bool,
    schedules: BTreeMap<PlantId, ScheduleEntry>,
    waterings: BTreeMap<PlantId, u32>,
    /// Every frame written by the app, in order, including dropped ones.
    received: Vec<Vec<u8>>,
    session: Option<mpsc::Sender<Vec<u8>>>,
}

/// A simulated irrigation controller.
#[derive(Debug)]
pub struct SimulatedController {
    state: Mutex<ControllerState>,
    reachable: AtomicBool,
    hang_on_connect: AtomicBool,
    silent: AtomicBool,
    telemetry_on_connect: AtomicBool,
    drop_remaining: AtomicU32,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedController {
    /// Creates a reachable controller with no schedules, in manual mode.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControllerState::default()),
            reachable: AtomicBool::new(true),
            hang_on_connect: AtomicBool::new(false),
            silent: AtomicBool::new(false),
            telemetry_on_connect: AtomicBool::new(false),
            drop_remaining: AtomicU32::new(0),
        }
    }

    /// Creates a controller preloaded with the plants' schedules.
    pub fn with_plants(plants: &[Plant]) -> Self {
        let schedules = plants
            .iter()
            .map(|p| (p.id, ScheduleEntry::from(&p.schedule)))
            .collect();
        Self {
            state: Mutex::new(ControllerState {
                schedules,
                ..Default::default()
            }),
            ..Self::new()
        }
    }

    // ── Fault knobs ─────────────────────────────────────────────

    /// When unreachable, `open` fails immediately.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// When set, `open` never completes.
    pub fn set_hang_on_connect(&self, hang: bool) {
        self.hang_on_connect.store(hang, Ordering::SeqCst);
    }

    /// When silent, commands are applied but never acknowledged.
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Push a telemetry frame as soon as a session opens.
    pub fn set_telemetry_on_connect(&self, enabled: bool) {
        self.telemetry_on_connect.store(enabled, Ordering::SeqCst);
    }

    /// Loses the next `count` frames before they reach the controller.
    pub fn drop_next(&self, count: u32) {
        self.drop_remaining.store(count, Ordering::SeqCst);
    }

    /// Simulates the radio link going away.
    pub async fn drop_link(&self) {
        if self.state.lock().await.session.take().is_some() {
            info!("Simulated controller dropped the link");
        }
    }

    // ── Inspection ──────────────────────────────────────────────

    pub async fn auto_mode(&self) -> bool {
        self.state.lock().await.auto_mode
    }

    pub async fn schedule(&self, plant_id: PlantId) -> Option<ScheduleEntry> {
        self.state.lock().await.schedules.get(&plant_id).copied()
    }

    /// Times the pump ran for a plant.
    pub async fn waterings(&self, plant_id: PlantId) -> u32 {
        self.state
            .lock()
            .await
            .waterings
            .get(&plant_id)
            .copied()
            .unwrap_or(0)
    }

    /// Raw frames written by the app, in order.
    pub async fn received_frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().await.received.clone()
    }

    /// Current controller state as telemetry.
    pub async fn snapshot(&self) -> DeviceSnapshot {
        let state = self.state.lock().await;
        DeviceSnapshot::new(state.auto_mode, state.schedules.values().copied().collect())
    }

    // ── Outbound (device → app) ─────────────────────────────────

    /// Pushes the current state as a telemetry frame.
    pub async fn push_telemetry(&self) -> Result<(), LinkError> {
        let snapshot = self.snapshot().await;
        let frame = codec::encode_frame(&InboundFrame::Telemetry { snapshot })
            .map_err(|e| LinkError::Unreachable(e.to_string()))?;
        self.push_raw(frame).await
    }

    /// Pushes arbitrary bytes to the app.
    pub async fn push_raw(&self, frame: Vec<u8>) -> Result<(), LinkError> {
        let session = self
            .state
            .lock()
            .await
            .session
            .clone()
            .ok_or(LinkError::Disconnected)?;
        session
            .send(frame)
            .await
            .map_err(|_| LinkError::Disconnected)
    }

    async fn apply(&self, command: Command) {
        let mut state = self.state.lock().await;
        match command {
            Command::SetSchedule {
                plant_id,
                interval_seconds,
                duration_seconds,
            } => {
                state.schedules.insert(
                    plant_id,
                    ScheduleEntry {
                        plant_id,
                        interval_seconds,
                        duration_seconds,
                    },
                );
            }
            Command::TriggerWater { plant_id } => {
                *state.waterings.entry(plant_id).or_insert(0) += 1;
            }
            Command::SetMode { auto } => state.auto_mode = auto,
        }
    }
}

#[async_trait]
impl Transport for SimulatedController {
    async fn open(&self) -> Result<mpsc::Receiver<Vec<u8>>, LinkError> {
        if self.hang_on_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(LinkError::Unreachable("controller not advertising".into()));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.state.lock().await.session = Some(tx);
        debug!("Simulated controller session opened");

        if self.telemetry_on_connect.load(Ordering::SeqCst) {
            self.push_telemetry().await?;
        }
        Ok(rx)
    }

    async fn write(&self, frame: &[u8]) -> Result<(), LinkError> {
        {
            let mut state = self.state.lock().await;
            if state.session.is_none() {
                return Err(LinkError::Disconnected);
            }
            state.received.push(frame.to_vec());
        }

        let dropped = self
            .drop_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            debug!("Simulated controller lost a frame");
            return Ok(());
        }

        let outbound = match codec::decode_command(frame) {
            Ok(outbound) => outbound,
            Err(e) => {
                warn!("Simulated controller ignored frame: {}", e);
                return Ok(());
            }
        };

        info!("Controller <- {}", outbound.command.mnemonic());
        self.apply(outbound.command).await;

        if self.silent.load(Ordering::SeqCst) {
            return Ok(());
        }
        let ack = codec::encode_frame(&InboundFrame::Ack {
            command_id: outbound.command_id,
        })
        .map_err(|e| LinkError::Unreachable(e.to_string()))?;
        self.push_raw(ack).await
    }

    async fn close(&self) {
        self.state.lock().await.session = None;
    }
}
