use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{config::MotionConfig, error::ThermostatError};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    None,
    Eco,
    Away,
    Boost,
    Comfort,
    Home,
    Sleep,
    /// Occupancy-driven preset; follows the motion / no-motion presets.
    Activity,
}

impl Preset {
    pub const CONFIGURABLE: [Preset; 6] = [
        Self::Eco,
        Self::Away,
        Self::Boost,
        Self::Comfort,
        Self::Home,
        Self::Sleep,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Eco => "eco",
            Self::Away => "away",
            Self::Boost => "boost",
            Self::Comfort => "comfort",
            Self::Home => "home",
            Self::Sleep => "sleep",
            Self::Activity => "activity",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        [Self::None, Self::Activity]
            .into_iter()
            .chain(Self::CONFIGURABLE)
            .find(|preset| preset.as_str() == lower)
    }
}

/// Configured preset temperatures plus the optional activity preset.
#[derive(Debug, Clone)]
pub struct PresetTable {
    temperatures: BTreeMap<Preset, f32>,
    motion: Option<MotionConfig>,
}

impl PresetTable {
    pub fn new(temperatures: BTreeMap<Preset, f32>, motion: Option<MotionConfig>) -> Self {
        let temperatures: BTreeMap<Preset, f32> = temperatures
            .into_iter()
            .filter(|(preset, temp)| Preset::CONFIGURABLE.contains(preset) && temp.is_finite())
            .collect();

        let motion = motion.filter(|motion| {
            motion.delay_ms > 0
                && temperatures.contains_key(&motion.motion_preset)
                && temperatures.contains_key(&motion.no_motion_preset)
        });

        Self {
            temperatures,
            motion,
        }
    }

    pub fn supports_motion(&self) -> bool {
        self.motion.is_some()
    }

    pub fn motion(&self) -> Option<&MotionConfig> {
        self.motion.as_ref()
    }

    pub fn available(&self) -> Vec<Preset> {
        let mut presets = vec![Preset::None];
        presets.extend(self.temperatures.keys().copied());
        if self.supports_motion() {
            presets.push(Preset::Activity);
        }
        presets
    }

    pub fn contains(&self, preset: Preset) -> bool {
        match preset {
            Preset::None => true,
            Preset::Activity => self.supports_motion(),
            other => self.temperatures.contains_key(&other),
        }
    }

    /// Target temperature a preset maps to. `Activity` resolves to the
    /// no-motion temperature; `None` has no temperature of its own.
    pub fn temperature(&self, preset: Preset) -> Option<f32> {
        match preset {
            Preset::None => None,
            Preset::Activity => self
                .motion
                .as_ref()
                .and_then(|motion| self.temperatures.get(&motion.no_motion_preset).copied()),
            other => self.temperatures.get(&other).copied(),
        }
    }

    pub fn motion_temperature(&self, detected: bool) -> Option<f32> {
        let motion = self.motion.as_ref()?;
        let preset = if detected {
            motion.motion_preset
        } else {
            motion.no_motion_preset
        };
        self.temperatures.get(&preset).copied()
    }

    pub fn first_temperature(&self) -> Option<f32> {
        self.temperatures.values().next().copied()
    }

    pub fn parse(&self, name: &str) -> Result<Preset, ThermostatError> {
        Preset::from_name(name)
            .filter(|preset| self.contains(*preset))
            .ok_or_else(|| ThermostatError::UnsupportedPresetRequested {
                requested: name.to_string(),
                available: self.available(),
            })
    }
}
