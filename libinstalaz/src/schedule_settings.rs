//! Global posting times, persisted as `schedule_settings.json`
//!
//! The file holds four named slots plus a master switch:
//!
//! ```json
//! {
//!   "enabled": true,
//!   "morning": {"hour": 7, "minute": 30},
//!   "afternoon": {"hour": 15, "minute": 0},
//!   "evening": {"hour": 18, "minute": 30},
//!   "night": {"hour": 23, "minute": 0}
//! }
//! ```
//!
//! Older installations wrote a bare list of `{hour, minute}` objects; those
//! are mapped onto the slots in order.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::{ConfigError, InstalazError, Result};
use crate::types::Slot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTime {
    pub hour: u32,
    pub minute: u32,
}

impl SlotTime {
    pub const fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 || self.minute > 59 {
            return Err(InstalazError::InvalidInput(format!(
                "{:02}:{:02} is not a valid time of day",
                self.hour, self.minute
            )));
        }
        Ok(())
    }

    pub fn matches(&self, hour: u32, minute: u32) -> bool {
        self.hour == hour && self.minute == minute
    }
}

impl std::fmt::Display for SlotTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_morning")]
    pub morning: SlotTime,
    #[serde(default = "default_afternoon")]
    pub afternoon: SlotTime,
    #[serde(default = "default_evening")]
    pub evening: SlotTime,
    #[serde(default = "default_night")]
    pub night: SlotTime,
}

fn default_enabled() -> bool {
    true
}

fn default_morning() -> SlotTime {
    SlotTime::new(7, 30)
}

fn default_afternoon() -> SlotTime {
    SlotTime::new(15, 0)
}

fn default_evening() -> SlotTime {
    SlotTime::new(18, 30)
}

fn default_night() -> SlotTime {
    SlotTime::new(23, 0)
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            morning: default_morning(),
            afternoon: default_afternoon(),
            evening: default_evening(),
            night: default_night(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredSettings {
    Named(ScheduleSettings),
    Legacy(Vec<SlotTime>),
}

impl ScheduleSettings {
    pub fn slot_time(&self, slot: Slot) -> SlotTime {
        match slot {
            Slot::Morning => self.morning,
            Slot::Afternoon => self.afternoon,
            Slot::Evening => self.evening,
            Slot::Night => self.night,
        }
    }

    pub fn set_slot_time(&mut self, slot: Slot, time: SlotTime) {
        match slot {
            Slot::Morning => self.morning = time,
            Slot::Afternoon => self.afternoon = time,
            Slot::Evening => self.evening = time,
            Slot::Night => self.night = time,
        }
    }

    /// Slots whose time is `hour:minute`; none while disabled
    pub fn due_slots(&self, hour: u32, minute: u32) -> Vec<Slot> {
        if !self.enabled {
            return Vec::new();
        }
        Slot::ALL
            .into_iter()
            .filter(|slot| self.slot_time(*slot).matches(hour, minute))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        for slot in Slot::ALL {
            self.slot_time(slot).validate()?;
        }
        Ok(())
    }

    /// Parse either the named form or the legacy list
    pub fn from_json(raw: &str) -> Result<Self> {
        let stored: StoredSettings = serde_json::from_str(raw).map_err(ConfigError::JsonError)?;
        let settings = match stored {
            StoredSettings::Named(settings) => settings,
            StoredSettings::Legacy(times) => {
                let mut settings = Self::default();
                for (slot, time) in Slot::ALL.into_iter().zip(times) {
                    settings.set_slot_time(slot, time);
                }
                settings
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path`; a missing or unreadable file yields the defaults
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!("Failed to read {}: {}; using default schedule", path.display(), e);
                return Self::default();
            }
        };
        match Self::from_json(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Invalid schedule settings in {}: {}; using default schedule", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(ConfigError::WriteError)?;
            }
        }
        let json = serde_json::to_string_pretty(self).map_err(ConfigError::JsonError)?;
        std::fs::write(path, json).map_err(ConfigError::WriteError)?;
        Ok(())
    }
}
