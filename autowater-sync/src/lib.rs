//! Device link and schedule sync engine for AutoWater.
//!
//! Keeps the app's view of an irrigation controller consistent with what the
//! controller has actually confirmed.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Link**: connection lifecycle over an abstract [`Transport`]
//! - **Codec**: deterministic encoding of commands and controller frames
//! - **Store**: confirmed and pending schedule state per plant
//! - **Engine**: delivery with acknowledgement, retry, timeout and reconciliation
//! - **Sim**: an in-process controller implementing [`Transport`]
//!
//! ## Command flow
//!
//! 1. **Propose**: the UI validates an edit through [`ScheduleStore::propose`]
//! 2. **Submit**: [`SyncEngine::submit`] queues it in the plant's lane
//! 3. **Send**: the lane worker writes the encoded frame through [`DeviceLink`]
//! 4. **Acknowledge**: the controller echoes the command id back
//! 5. **Reconcile**: the engine writes the confirmed schedule into the store
//!
//! # Example
//!
//! ```
//! use autowater_sync::{DeviceLink, LinkConfig, ScheduleStore, SimulatedController};
//! use autowater_sync::{SyncConfig, SyncEngine};
//! use autowater_types::default_plants;
//! use std::sync::Arc;
//!
//! let plants = default_plants();
//! let controller = Arc::new(SimulatedController::with_plants(&plants));
//! let link = Arc::new(DeviceLink::new(controller, LinkConfig::default()));
//! let store = Arc::new(ScheduleStore::new(plants));
//!
//! let engine = SyncEngine::new(link, store, SyncConfig::default());
//! ```

pub mod codec;
mod engine;
mod error;
pub mod link;
pub mod protocol;
pub mod sim;
pub mod store;

pub use engine::{CommandStatus, PendingCommand, SyncConfig, SyncEngine, SyncEvent};
pub use error::{DecodeError, FailureReason, LinkError, SyncError, SyncResult};
pub use link::{ConnectionState, DeviceLink, LinkConfig, Transport};
pub use protocol::{
    Command, DeviceSnapshot, InboundFrame, OutboundFrame, ScheduleEntry, MAX_FRAME_SIZE,
    PROTOCOL_VERSION,
};
pub use sim::SimulatedController;
pub use store::{Lane, PlantView, Proposal, ScheduleStore, StoreEvent};
