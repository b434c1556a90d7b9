//! A connected session against the simulated controller.

use crate::settings::Settings;
use anyhow::{bail, Context, Result};
use autowater_sync::{
    ConnectionState, DeviceLink, PlantView, Proposal, ScheduleStore, SimulatedController,
    SyncEngine,
};
use autowater_types::{CommandId, PlantId, PlantSchedule, ScheduleEdit};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

/// Faults injected into the simulated controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Frames lost before the controller sees them.
    pub drop_first: u32,
    /// Apply commands but never acknowledge.
    pub silent: bool,
}

pub struct Session {
    controller: Arc<SimulatedController>,
    link: Arc<DeviceLink>,
    store: Arc<ScheduleStore>,
    engine: SyncEngine,
}

impl Session {
    /// Builds the stack from `settings` and connects.
    pub async fn start(settings: &Settings, faults: Faults) -> Result<Self> {
        let plants = settings.plants()?;

        let controller = Arc::new(SimulatedController::with_plants(&plants));
        controller.set_telemetry_on_connect(true);
        controller.set_silent(faults.silent);
        controller.drop_next(faults.drop_first);

        let link = Arc::new(DeviceLink::new(controller.clone(), settings.link.clone()));
        let store = Arc::new(ScheduleStore::new(plants));
        let engine = SyncEngine::new(link.clone(), store.clone(), settings.sync.clone());
        engine.start().await;

        let session = Self {
            controller,
            link,
            store,
            engine,
        };
        session.connect().await?;
        Ok(session)
    }

    pub fn controller(&self) -> &Arc<SimulatedController> {
        &self.controller
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    pub fn store(&self) -> &Arc<ScheduleStore> {
        &self.store
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub async fn connect(&self) -> Result<()> {
        self.link
            .connect()
            .await
            .with_context(|| format!("Failed to connect to {}", self.link.device_name()))
    }

    /// Renders the current plant table.
    pub async fn status(&self) -> String {
        render_status(
            self.link.device_name(),
            self.link.state(),
            self.store.auto_mode().await,
            &self.store.plants().await,
        )
    }

    /// Runs the pump for one plant now.
    pub async fn water(&self, plant_id: PlantId) -> Result<CommandId> {
        if self.store.plant_name(plant_id).await.is_none() {
            bail!("unknown plant {plant_id}");
        }
        self.deliver(Proposal::trigger_water(plant_id)).await
    }

    /// Switches between automatic and manual mode.
    pub async fn set_mode(&self, auto: bool) -> Result<CommandId> {
        let proposal = self.store.propose_mode(auto).await;
        self.deliver(proposal).await
    }

    /// Edits a plant's schedule and returns the schedule the controller
    /// confirmed.
    pub async fn schedule(&self, plant_id: PlantId, edit: ScheduleEdit) -> Result<PlantSchedule> {
        if edit.is_empty() {
            bail!("nothing to change: pass --every, --unit or --duration");
        }
        let proposal = self
            .store
            .propose(plant_id, edit)
            .await
            .with_context(|| format!("Rejected schedule for plant {plant_id}"))?;
        self.deliver(proposal).await?;

        self.store
            .get_confirmed(plant_id)
            .await
            .with_context(|| format!("plant {plant_id} vanished from the store"))
    }

    /// Sends a plant's kept pending edit again, typically after reconnecting.
    /// Returns `None` when nothing was pending.
    pub async fn resubmit(&self, plant_id: PlantId) -> Result<Option<PlantSchedule>> {
        if !self.store.has_pending_edit(plant_id).await {
            return Ok(None);
        }
        let pending = self
            .store
            .get_pending(plant_id)
            .await
            .with_context(|| format!("plant {plant_id} vanished from the store"))?;
        self.deliver(Proposal::SetSchedule(pending)).await?;
        Ok(self.store.get_confirmed(plant_id).await)
    }

    /// Stops the engine and closes the link.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
        self.link.disconnect().await;
    }

    async fn deliver(&self, proposal: Proposal) -> Result<CommandId> {
        let mnemonic = proposal.command().mnemonic();
        let command_id = self.engine.submit(proposal).await?;
        self.engine
            .wait(command_id)
            .await
            .with_context(|| format!("{mnemonic} was not confirmed"))?;
        info!("{} confirmed as {}", mnemonic, command_id);
        Ok(command_id)
    }
}

/// Formats the plant table shown by `autowater status`.
pub fn render_status(
    device_name: &str,
    state: ConnectionState,
    auto_mode: bool,
    plants: &[PlantView],
) -> String {
    let mode = if auto_mode { "automatic" } else { "manual" };
    let mut out = format!("{device_name}: {state}, {mode} mode\n");
    for plant in plants {
        let _ = write!(out, "  {:>2} {:<12} {}", plant.id.get(), plant.name, plant.pending);
        if plant.has_pending_edit {
            let _ = write!(out, " (pending; confirmed {})", plant.confirmed);
        }
        out.push('\n');
    }
    out
}
