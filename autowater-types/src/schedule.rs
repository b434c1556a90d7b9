//! Watering schedules.
//!
//! A schedule says how often a plant is watered (`interval_value` units of
//! hours or days) and for how long the pump runs (`duration_seconds`). The
//! controller itself only understands seconds; [`PlantSchedule::interval_seconds`]
//! and [`PlantSchedule::from_interval_seconds`] convert between the two.

use crate::{PlantId, Result, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Accepted values for [`PlantSchedule::interval_value`].
pub const INTERVAL_RANGE: RangeInclusive<u32> = 1..=30;

/// Accepted values for [`PlantSchedule::duration_seconds`].
pub const DURATION_RANGE: RangeInclusive<u32> = 1..=60;

pub const SECONDS_PER_HOUR: u64 = 3_600;
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Unit of a watering interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    #[default]
    Hours,
    Days,
}

impl IntervalUnit {
    /// Seconds in one unit.
    #[must_use]
    pub const fn seconds(self) -> u64 {
        match self {
            Self::Hours => SECONDS_PER_HOUR,
            Self::Days => SECONDS_PER_DAY,
        }
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hours => f.write_str("hours"),
            Self::Days => f.write_str("days"),
        }
    }
}

impl std::str::FromStr for IntervalUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h" | "hour" | "hours" => Ok(Self::Hours),
            "d" | "day" | "days" => Ok(Self::Days),
            other => Err(format!("unknown interval unit: {other}")),
        }
    }
}

/// A validated watering schedule for one plant.
///
/// Construction always goes through [`PlantSchedule::new`] (deserialization
/// included), so a value of this type is within range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSchedule")]
pub struct PlantSchedule {
    plant_id: PlantId,
    interval_value: u32,
    interval_unit: IntervalUnit,
    duration_seconds: u32,
}

#[derive(Deserialize)]
struct RawSchedule {
    plant_id: PlantId,
    interval_value: u32,
    interval_unit: IntervalUnit,
    duration_seconds: u32,
}

impl TryFrom<RawSchedule> for PlantSchedule {
    type Error = ValidationError;

    fn try_from(raw: RawSchedule) -> Result<Self> {
        Self::new(
            raw.plant_id,
            raw.interval_value,
            raw.interval_unit,
            raw.duration_seconds,
        )
    }
}

impl PlantSchedule {
    /// Creates a schedule, rejecting out-of-range values.
    pub fn new(
        plant_id: PlantId,
        interval_value: u32,
        interval_unit: IntervalUnit,
        duration_seconds: u32,
    ) -> Result<Self> {
        if !INTERVAL_RANGE.contains(&interval_value) {
            return Err(ValidationError::IntervalOutOfRange(interval_value));
        }
        if !DURATION_RANGE.contains(&duration_seconds) {
            return Err(ValidationError::DurationOutOfRange(duration_seconds));
        }
        Ok(Self {
            plant_id,
            interval_value,
            interval_unit,
            duration_seconds,
        })
    }

    /// Rebuilds a schedule from the controller's seconds-based form.
    ///
    /// Whole days are preferred over hours, so `86400` reads back as one day
    /// rather than 24 hours.
    pub fn from_interval_seconds(
        plant_id: PlantId,
        interval_seconds: u64,
        duration_seconds: u32,
    ) -> Result<Self> {
        let unit = [IntervalUnit::Days, IntervalUnit::Hours]
            .into_iter()
            .find(|unit| {
                interval_seconds % unit.seconds() == 0
                    && u32::try_from(interval_seconds / unit.seconds())
                        .is_ok_and(|v| INTERVAL_RANGE.contains(&v))
            })
            .ok_or(ValidationError::UnrepresentableInterval(interval_seconds))?;

        let value = (interval_seconds / unit.seconds()) as u32;
        Self::new(plant_id, value, unit, duration_seconds)
    }

    pub fn plant_id(&self) -> PlantId {
        self.plant_id
    }

    pub fn interval_value(&self) -> u32 {
        self.interval_value
    }

    pub fn interval_unit(&self) -> IntervalUnit {
        self.interval_unit
    }

    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    /// The interval expressed in seconds, as the controller expects it.
    pub fn interval_seconds(&self) -> u64 {
        u64::from(self.interval_value) * self.interval_unit.seconds()
    }
}

impl fmt::Display for PlantSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "every {} {} for {}s",
            self.interval_value, self.interval_unit, self.duration_seconds
        )
    }
}

/// A partial change to a schedule. Unset fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEdit {
    #[serde(default)]
    pub interval_value: Option<u32>,
    #[serde(default)]
    pub interval_unit: Option<IntervalUnit>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
}

impl ScheduleEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interval(mut self, value: u32, unit: IntervalUnit) -> Self {
        self.interval_value = Some(value);
        self.interval_unit = Some(unit);
        self
    }

    pub fn interval_value(mut self, value: u32) -> Self {
        self.interval_value = Some(value);
        self
    }

    pub fn interval_unit(mut self, unit: IntervalUnit) -> Self {
        self.interval_unit = Some(unit);
        self
    }

    pub fn duration(mut self, seconds: u32) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    /// Whether the edit changes nothing.
    pub fn is_empty(&self) -> bool {
        self.interval_value.is_none()
            && self.interval_unit.is_none()
            && self.duration_seconds.is_none()
    }

    /// Applies the edit on top of `base`, validating the result.
    pub fn apply(&self, base: &PlantSchedule) -> Result<PlantSchedule> {
        PlantSchedule::new(
            base.plant_id,
            self.interval_value.unwrap_or(base.interval_value),
            self.interval_unit.unwrap_or(base.interval_unit),
            self.duration_seconds.unwrap_or(base.duration_seconds),
        )
    }
}
