//! TOML settings file.
//!
//! ```toml
//! [link]
//! device_name = "AutoWaterESP32"
//! connect_timeout_ms = 5000
//!
//! [sync]
//! max_attempts = 3
//! ack_timeout_ms = 5000
//!
//! [[plants]]
//! id = 1
//! name = "Rose"
//! every = 2
//! unit = "hours"
//! duration = 5
//! ```
//!
//! Every section is optional. Without `[[plants]]` the default catalog is used.

use anyhow::{bail, Context, Result};
use autowater_sync::{LinkConfig, SyncConfig};
use autowater_types::{default_plants, IntervalUnit, Plant, PlantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub link: LinkConfig,
    pub sync: SyncConfig,
    pub plants: Vec<PlantSettings>,
}

/// One `[[plants]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlantSettings {
    pub id: u32,
    pub name: String,
    pub every: u32,
    #[serde(default)]
    pub unit: IntervalUnit,
    pub duration: u32,
}

impl Settings {
    /// Loads settings from `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// The configured plant catalog, validated.
    pub fn plants(&self) -> Result<Vec<Plant>> {
        if self.plants.is_empty() {
            return Ok(default_plants());
        }

        let mut seen = BTreeSet::new();
        let mut plants = Vec::with_capacity(self.plants.len());
        for entry in &self.plants {
            if !seen.insert(entry.id) {
                bail!("plant {} is configured twice", entry.id);
            }
            let plant = Plant::new(
                PlantId::new(entry.id),
                entry.name.as_str(),
                entry.every,
                entry.unit,
                entry.duration,
            )
            .with_context(|| format!("invalid schedule for plant {} ({})", entry.id, entry.name))?;
            plants.push(plant);
        }
        Ok(plants)
    }
}
