use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ThermostatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Heat,
    Cool,
    Off,
}

impl ControlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlMode {
    type Err = ThermostatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "heat" => Ok(Self::Heat),
            "cool" => Ok(Self::Cool),
            "off" => Ok(Self::Off),
            _ => Err(ThermostatError::UnrecognizedMode(value.to_string())),
        }
    }
}

/// What caused a control pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTrigger {
    /// Sensor update or another state change observed on the bus.
    Event,
    /// Periodic re-assertion of the actuator state.
    KeepAlive,
    /// Explicit user command; bypasses the minimum cycle duration.
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Threshold,
    Proportional,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Threshold => "threshold",
            Self::Proportional => "proportional",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseCurve {
    Linear,
    Atan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    None,
    On,
    Off,
}

impl CyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacAction {
    Off,
    Idle,
    Heating,
    Cooling,
}

impl HvacAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Idle => "idle",
            Self::Heating => "heating",
            Self::Cooling => "cooling",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThermostatStatus {
    pub name: String,
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f32>,
    #[serde(rename = "targetTemp")]
    pub target_temp: f32,
    #[serde(rename = "minTemp")]
    pub min_temp: f32,
    #[serde(rename = "maxTemp")]
    pub max_temp: f32,
    pub mode: &'static str,
    pub modes: Vec<&'static str>,
    pub preset: &'static str,
    pub presets: Vec<&'static str>,
    pub action: &'static str,
    pub active: bool,
    #[serde(rename = "actuatorOn")]
    pub actuator_on: bool,
    pub algorithm: &'static str,
    pub phase: Option<&'static str>,
    #[serde(rename = "onFraction")]
    pub on_fraction: Option<f32>,
    #[serde(rename = "onDurationSec")]
    pub on_duration_sec: Option<f32>,
    #[serde(rename = "offDurationSec")]
    pub off_duration_sec: Option<f32>,
    #[serde(rename = "phaseRemainingMs")]
    pub phase_remaining_ms: u64,
    #[serde(rename = "currentPower")]
    pub current_power: Option<f32>,
    #[serde(rename = "powerCeiling")]
    pub power_ceiling: Option<f32>,
    #[serde(rename = "powerExceeded")]
    pub power_exceeded: bool,
    #[serde(rename = "windowOpen")]
    pub window_open: Option<bool>,
}
