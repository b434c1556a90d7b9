//! Core type definitions for AutoWater.
//!
//! This crate defines the plain data types shared by the sync core and its
//! front ends:
//! - Plant and command identifiers
//! - Watering schedules and the edits proposed against them
//! - The default plant catalog
//!
//! Nothing here performs I/O.

mod ids;
mod plant;
mod schedule;

pub use ids::{CommandId, PlantId};
pub use plant::{default_plants, Plant};
pub use schedule::{
    IntervalUnit, PlantSchedule, ScheduleEdit, DURATION_RANGE, INTERVAL_RANGE, SECONDS_PER_DAY,
    SECONDS_PER_HOUR,
};

/// Result type alias for schedule validation.
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Rejected user input. Raised before any device traffic happens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("interval value {0} out of range (1..=30)")]
    IntervalOutOfRange(u32),

    #[error("duration {0}s out of range (1..=60)")]
    DurationOutOfRange(u32),

    #[error("interval of {0}s is not a whole number of hours or days in range")]
    UnrepresentableInterval(u64),

    #[error("unknown plant: {0}")]
    UnknownPlant(PlantId),
}
