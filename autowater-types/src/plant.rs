//! Plants known to the controller.

use crate::{IntervalUnit, PlantId, PlantSchedule, Result};
use serde::{Deserialize, Serialize};

/// A plant wired to one controller channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plant {
    pub id: PlantId,
    pub name: String,
    pub schedule: PlantSchedule,
}

impl Plant {
    /// Creates a plant with a validated schedule.
    pub fn new(
        id: impl Into<PlantId>,
        name: impl Into<String>,
        interval_value: u32,
        interval_unit: IntervalUnit,
        duration_seconds: u32,
    ) -> Result<Self> {
        let id = id.into();
        Ok(Self {
            id,
            name: name.into(),
            schedule: PlantSchedule::new(id, interval_value, interval_unit, duration_seconds)?,
        })
    }
}

/// The four-channel catalog the controller ships with.
pub fn default_plants() -> Vec<Plant> {
    [
        (1, "Rose", 2, IntervalUnit::Hours, 5),
        (2, "Orchid", 3, IntervalUnit::Hours, 3),
        (3, "Sunflower", 1, IntervalUnit::Hours, 8),
        (4, "Ficus", 1, IntervalUnit::Days, 4),
    ]
    .into_iter()
    .filter_map(|(id, name, value, unit, duration)| {
        Plant::new(id, name, value, unit, duration).ok()
    })
    .collect()
}
