//! Schedule store: confirmed and pending state per plant.
//!
//! Each plant has a *confirmed* schedule (what the controller last
//! acknowledged or reported) and at most one *pending* edit (what the user
//! proposed and has not seen confirmed yet). Readers see the pending edit when
//! there is one and the confirmed schedule otherwise. The automatic-mode flag
//! follows the same split.
//!
//! Only the sync engine reconciles; the UI writes through proposals.

use crate::link::ConnectionState;
use crate::protocol::{Command, DeviceSnapshot, ScheduleEntry};
use autowater_types::{CommandId, Plant, PlantId, PlantSchedule, ScheduleEdit, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// The ordering domain of a command.
///
/// Commands in one lane are processed strictly in submission order; lanes
/// progress independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Lane {
    /// Commands addressing one plant.
    Plant(PlantId),
    /// Device-wide commands (mode changes).
    Device,
}

/// A validated change ready to be submitted to the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proposal {
    SetSchedule(PlantSchedule),
    TriggerWater(PlantId),
    SetMode(bool),
}

impl Proposal {
    /// An immediate watering request. Never recorded in the store.
    pub fn trigger_water(plant_id: PlantId) -> Self {
        Self::TriggerWater(plant_id)
    }

    /// The wire command carrying this proposal.
    pub fn command(&self) -> Command {
        match self {
            Self::SetSchedule(schedule) => Command::set_schedule(schedule),
            Self::TriggerWater(plant_id) => Command::TriggerWater {
                plant_id: *plant_id,
            },
            Self::SetMode(auto) => Command::SetMode { auto: *auto },
        }
    }

    /// The lane this proposal is ordered in.
    pub fn lane(&self) -> Lane {
        match self {
            Self::SetSchedule(schedule) => Lane::Plant(schedule.plant_id()),
            Self::TriggerWater(plant_id) => Lane::Plant(*plant_id),
            Self::SetMode(_) => Lane::Device,
        }
    }
}

/// Change notification for store observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ScheduleProposed {
        plant_id: PlantId,
        schedule: PlantSchedule,
    },
    ScheduleConfirmed {
        plant_id: PlantId,
        schedule: PlantSchedule,
    },
    EditDiscarded {
        plant_id: PlantId,
    },
    ModeProposed {
        auto: bool,
    },
    ModeConfirmed {
        auto: bool,
    },
    SnapshotApplied {
        plants: usize,
    },
    ConnectionChanged(ConnectionState),
}

/// Read-only view of one plant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlantView {
    pub id: PlantId,
    pub name: String,
    pub confirmed: PlantSchedule,
    /// Equal to `confirmed` when no edit is pending.
    pub pending: PlantSchedule,
    pub has_pending_edit: bool,
    /// Command carrying the pending edit, once submitted.
    pub pending_command: Option<CommandId>,
}

#[derive(Debug, Clone)]
struct PendingEdit<T> {
    value: T,
    command_id: Option<CommandId>,
}

#[derive(Debug, Clone)]
struct PlantRecord {
    name: String,
    confirmed: PlantSchedule,
    pending: Option<PendingEdit<PlantSchedule>>,
}

impl PlantRecord {
    fn current(&self) -> PlantSchedule {
        self.pending.as_ref().map_or(self.confirmed, |p| p.value)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    plants: BTreeMap<PlantId, PlantRecord>,
    auto_mode: bool,
    pending_mode: Option<PendingEdit<bool>>,
}

/// Confirmed and pending schedule state, shared between the UI and the engine.
pub struct ScheduleStore {
    inner: RwLock<StoreInner>,
    events: broadcast::Sender<StoreEvent>,
}

impl std::fmt::Debug for ScheduleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleStore").finish_non_exhaustive()
    }
}

impl Default for ScheduleStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ScheduleStore {
    /// Creates a store whose confirmed layer is `plants`, in manual mode.
    pub fn new(plants: Vec<Plant>) -> Self {
        let plants = plants
            .into_iter()
            .map(|plant| {
                (
                    plant.id,
                    PlantRecord {
                        name: plant.name,
                        confirmed: plant.schedule,
                        pending: None,
                    },
                )
            })
            .collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: RwLock::new(StoreInner {
                plants,
                ..Default::default()
            }),
            events,
        }
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    // ── Read accessors ──────────────────────────────────────────

    /// All plants, ordered by id.
    pub async fn plants(&self) -> Vec<PlantView> {
        let inner = self.inner.read().await;
        inner
            .plants
            .iter()
            .map(|(id, record)| PlantView {
                id: *id,
                name: record.name.clone(),
                confirmed: record.confirmed,
                pending: record.current(),
                has_pending_edit: record.pending.is_some(),
                pending_command: record.pending.as_ref().and_then(|p| p.command_id),
            })
            .collect()
    }

    pub async fn plant_name(&self, plant_id: PlantId) -> Option<String> {
        let inner = self.inner.read().await;
        inner.plants.get(&plant_id).map(|r| r.name.clone())
    }

    /// The last schedule the controller confirmed.
    pub async fn get_confirmed(&self, plant_id: PlantId) -> Option<PlantSchedule> {
        let inner = self.inner.read().await;
        inner.plants.get(&plant_id).map(|r| r.confirmed)
    }

    /// The pending edit, or the confirmed schedule when nothing is pending.
    pub async fn get_pending(&self, plant_id: PlantId) -> Option<PlantSchedule> {
        let inner = self.inner.read().await;
        inner.plants.get(&plant_id).map(PlantRecord::current)
    }

    pub async fn has_pending_edit(&self, plant_id: PlantId) -> bool {
        let inner = self.inner.read().await;
        inner
            .plants
            .get(&plant_id)
            .is_some_and(|r| r.pending.is_some())
    }

    /// The confirmed automatic-mode flag.
    pub async fn auto_mode(&self) -> bool {
        self.inner.read().await.auto_mode
    }

    /// The proposed automatic-mode flag, or the confirmed one.
    pub async fn pending_auto_mode(&self) -> bool {
        let inner = self.inner.read().await;
        inner
            .pending_mode
            .as_ref()
            .map_or(inner.auto_mode, |p| p.value)
    }

    // ── Proposals ───────────────────────────────────────────────

    /// Validates `edit` against the plant's current schedule and records it
    /// as the pending edit. Leaves the store untouched on error.
    pub async fn propose(
        &self,
        plant_id: PlantId,
        edit: ScheduleEdit,
    ) -> Result<Proposal, ValidationError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .plants
            .get_mut(&plant_id)
            .ok_or(ValidationError::UnknownPlant(plant_id))?;

        let schedule = edit.apply(&record.current())?;
        record.pending = Some(PendingEdit {
            value: schedule,
            command_id: None,
        });
        drop(inner);

        debug!("Proposed schedule for plant {}: {}", plant_id, schedule);
        self.emit(StoreEvent::ScheduleProposed { plant_id, schedule });
        Ok(Proposal::SetSchedule(schedule))
    }

    /// Records a pending mode change.
    pub async fn propose_mode(&self, auto: bool) -> Proposal {
        self.inner.write().await.pending_mode = Some(PendingEdit {
            value: auto,
            command_id: None,
        });
        self.emit(StoreEvent::ModeProposed { auto });
        Proposal::SetMode(auto)
    }

    /// Links the pending edit matching `proposal` to the command carrying it.
    pub async fn attach(&self, proposal: &Proposal, command_id: CommandId) {
        let mut inner = self.inner.write().await;
        match proposal {
            Proposal::SetSchedule(schedule) => {
                let pending = inner
                    .plants
                    .get_mut(&schedule.plant_id())
                    .and_then(|r| r.pending.as_mut());
                if let Some(pending) = pending.filter(|p| p.value == *schedule) {
                    pending.command_id = Some(command_id);
                }
            }
            Proposal::SetMode(auto) => {
                if let Some(pending) = inner.pending_mode.as_mut().filter(|p| p.value == *auto) {
                    pending.command_id = Some(command_id);
                }
            }
            Proposal::TriggerWater(_) => {}
        }
    }

    /// Drops the pending edit for a plant. Returns whether one existed.
    pub async fn discard(&self, plant_id: PlantId) -> bool {
        let discarded = {
            let mut inner = self.inner.write().await;
            inner
                .plants
                .get_mut(&plant_id)
                .and_then(|r| r.pending.take())
                .is_some()
        };
        if discarded {
            self.emit(StoreEvent::EditDiscarded { plant_id });
        }
        discarded
    }

    /// Drops a pending mode change. Returns whether one existed.
    pub async fn discard_mode(&self) -> bool {
        self.inner.write().await.pending_mode.take().is_some()
    }

    // ── Reconciliation ──────────────────────────────────────────

    /// Overwrites the confirmed schedule. The pending edit is cleared only
    /// when it was carried by `command_id`.
    pub async fn reconcile(
        &self,
        plant_id: PlantId,
        confirmed: PlantSchedule,
        command_id: Option<CommandId>,
    ) {
        {
            let mut inner = self.inner.write().await;
            let record = inner
                .plants
                .entry(plant_id)
                .or_insert_with(|| PlantRecord {
                    name: format!("Plant {plant_id}"),
                    confirmed,
                    pending: None,
                });
            record.confirmed = confirmed;

            let settled = record
                .pending
                .as_ref()
                .is_some_and(|p| command_id.is_some() && p.command_id == command_id);
            if settled {
                record.pending = None;
            }
        }

        debug!("Plant {} confirmed: {}", plant_id, confirmed);
        self.emit(StoreEvent::ScheduleConfirmed {
            plant_id,
            schedule: confirmed,
        });
    }

    /// Overwrites the confirmed mode, clearing the pending change carried by
    /// `command_id`.
    pub async fn reconcile_mode(&self, auto: bool, command_id: Option<CommandId>) {
        {
            let mut inner = self.inner.write().await;
            inner.auto_mode = auto;
            let settled = inner
                .pending_mode
                .as_ref()
                .is_some_and(|p| command_id.is_some() && p.command_id == command_id);
            if settled {
                inner.pending_mode = None;
            }
        }
        self.emit(StoreEvent::ModeConfirmed { auto });
    }

    /// Replaces the confirmed layer with a controller snapshot.
    ///
    /// The whole snapshot is applied under one write lock, so readers see
    /// either none of it or all of it, and observers get a single
    /// [`StoreEvent::SnapshotApplied`]. Pending edits are kept. Entries that
    /// do not form a valid schedule are skipped. Returns the number of
    /// schedules applied.
    pub async fn apply_snapshot(&self, snapshot: &DeviceSnapshot) -> usize {
        let mut applied = 0;
        {
            let mut inner = self.inner.write().await;
            for entry in &snapshot.schedules {
                let plant_id = entry.plant_id;
                let schedule = match snapshot_schedule(entry, inner.plants.get(&plant_id)) {
                    Ok(schedule) => schedule,
                    Err(e) => {
                        warn!("Skipping telemetry entry for plant {}: {}", plant_id, e);
                        continue;
                    }
                };

                inner
                    .plants
                    .entry(plant_id)
                    .and_modify(|record| record.confirmed = schedule)
                    .or_insert_with(|| PlantRecord {
                        name: format!("Plant {plant_id}"),
                        confirmed: schedule,
                        pending: None,
                    });
                applied += 1;
            }
            inner.auto_mode = snapshot.auto_mode;
        }

        info!(
            "Applied device snapshot: {} schedules, auto mode {}",
            applied, snapshot.auto_mode
        );
        self.emit(StoreEvent::SnapshotApplied { plants: applied });
        applied
    }

    pub(crate) fn notify_connection(&self, state: ConnectionState) {
        self.emit(StoreEvent::ConnectionChanged(state));
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Converts a telemetry entry. The controller only reports seconds, so a
/// plant whose confirmed or pending schedule already has that interval keeps
/// its unit (24 hours stays 24 hours rather than becoming 1 day).
fn snapshot_schedule(
    entry: &ScheduleEntry,
    existing: Option<&PlantRecord>,
) -> Result<PlantSchedule, ValidationError> {
    let known = existing
        .into_iter()
        .flat_map(|record| [Some(record.confirmed), record.pending.as_ref().map(|p| p.value)])
        .flatten()
        .find(|schedule| schedule.interval_seconds() == entry.interval_seconds);

    match known {
        Some(known) => PlantSchedule::new(
            entry.plant_id,
            known.interval_value(),
            known.interval_unit(),
            entry.duration_seconds,
        ),
        None => entry.to_schedule(),
    }
}
