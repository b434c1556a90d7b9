//! Controller protocol messages and types.
//!
//! The protocol is a simple command/acknowledge exchange:
//! 1. The app sends an [`OutboundFrame`] carrying a command and its id
//! 2. The controller applies it and answers `Ack { command_id }`
//! 3. The controller may push `Telemetry` with its full state at any time
//!
//! Commands are idempotent on the device side, so a command resent after a
//! lost acknowledgement leaves the controller in the same state.

use autowater_types::{CommandId, PlantId, PlantSchedule, ValidationError};
use serde::{Deserialize, Serialize};

/// Protocol version advertised in telemetry.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame body size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// `type` tags of frames sent by the app.
pub const COMMAND_TYPES: &[&str] = &["set_schedule", "trigger_water", "set_mode"];

/// `type` tags of frames sent by the controller.
pub const FRAME_TYPES: &[&str] = &["ack", "telemetry"];

/// A command understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Stores a watering schedule for one channel.
    SetSchedule {
        plant_id: PlantId,
        interval_seconds: u64,
        duration_seconds: u32,
    },

    /// Runs the pump for one channel now.
    TriggerWater { plant_id: PlantId },

    /// Switches between automatic and manual operation.
    SetMode { auto: bool },
}

impl Command {
    /// Builds a `SetSchedule` command from a validated schedule.
    pub fn set_schedule(schedule: &PlantSchedule) -> Self {
        Self::SetSchedule {
            plant_id: schedule.plant_id(),
            interval_seconds: schedule.interval_seconds(),
            duration_seconds: schedule.duration_seconds(),
        }
    }

    /// The plant this command addresses, if any.
    pub fn plant_id(&self) -> Option<PlantId> {
        match self {
            Self::SetSchedule { plant_id, .. } | Self::TriggerWater { plant_id } => Some(*plant_id),
            Self::SetMode { .. } => None,
        }
    }

    /// The controller's text form of this command, used in logs.
    pub fn mnemonic(&self) -> String {
        match self {
            Self::SetSchedule {
                plant_id,
                interval_seconds,
                duration_seconds,
            } => format!("SET{plant_id}:{interval_seconds}:{duration_seconds}"),
            Self::TriggerWater { plant_id } => format!("R{plant_id}ON"),
            Self::SetMode { auto: true } => "AUTO".to_string(),
            Self::SetMode { auto: false } => "MANUAL".to_string(),
        }
    }
}

/// A command together with the id the controller echoes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub command_id: CommandId,
    #[serde(flatten)]
    pub command: Command,
}

impl OutboundFrame {
    pub fn new(command_id: CommandId, command: Command) -> Self {
        Self {
            command_id,
            command,
        }
    }
}

/// A frame sent by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// The command with this id was applied.
    Ack { command_id: CommandId },

    /// Full controller state.
    Telemetry { snapshot: DeviceSnapshot },
}

/// One channel's schedule as the controller stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub plant_id: PlantId,
    pub interval_seconds: u64,
    pub duration_seconds: u32,
}

impl ScheduleEntry {
    /// Converts to a validated schedule.
    pub fn to_schedule(&self) -> Result<PlantSchedule, ValidationError> {
        PlantSchedule::from_interval_seconds(
            self.plant_id,
            self.interval_seconds,
            self.duration_seconds,
        )
    }
}

impl From<&PlantSchedule> for ScheduleEntry {
    fn from(schedule: &PlantSchedule) -> Self {
        Self {
            plant_id: schedule.plant_id(),
            interval_seconds: schedule.interval_seconds(),
            duration_seconds: schedule.duration_seconds(),
        }
    }
}

/// Last full state reported by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    pub auto_mode: bool,
    #[serde(default)]
    pub schedules: Vec<ScheduleEntry>,
}

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

impl DeviceSnapshot {
    pub fn new(auto_mode: bool, schedules: Vec<ScheduleEntry>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            auto_mode,
            schedules,
        }
    }
}
