use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    preset::Preset,
    types::{Algorithm, ControlMode, ResponseCurve},
};

/// Longest accepted duty cycle, motion delay or keep-alive period.
pub const MAX_PERIOD_MS: u64 = 24 * 60 * 60 * 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProportionalConfig {
    pub bias: f32,
    pub curve: ResponseCurve,
    pub cycle_minutes: f32,
}

impl Default for ProportionalConfig {
    fn default() -> Self {
        Self {
            bias: 0.25,
            curve: ResponseCurve::Linear,
            cycle_minutes: 5.0,
        }
    }
}

impl ProportionalConfig {
    pub fn cycle_length_sec(&self) -> f32 {
        self.cycle_minutes * 60.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerGuardConfig {
    /// Power drawn by the controlled device while on, in the same unit as the
    /// power sensors.
    pub device_power: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    pub motion_preset: Preset,
    pub no_motion_preset: Preset,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatConfig {
    pub name: String,
    pub target_temp: Option<f32>,
    pub min_temp: f32,
    pub max_temp: f32,
    pub cold_tolerance: f32,
    pub hot_tolerance: f32,
    pub ac_mode: bool,
    pub min_cycle_duration_ms: Option<u64>,
    pub keep_alive_ms: Option<u64>,
    pub initial_mode: Option<ControlMode>,
    pub algorithm: Algorithm,
    pub proportional: ProportionalConfig,
    pub power_guard: Option<PowerGuardConfig>,
    pub presets: BTreeMap<Preset, f32>,
    pub motion: Option<MotionConfig>,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            name: "Thermostat".to_string(),
            target_temp: None,
            min_temp: 7.0,
            max_temp: 35.0,
            cold_tolerance: 0.3,
            hot_tolerance: 0.3,
            ac_mode: false,
            min_cycle_duration_ms: None,
            keep_alive_ms: None,
            initial_mode: None,
            algorithm: Algorithm::Threshold,
            proportional: ProportionalConfig::default(),
            power_guard: None,
            presets: BTreeMap::new(),
            motion: None,
        }
    }
}

impl ThermostatConfig {
    pub fn sanitize(&mut self) {
        if !self.min_temp.is_finite() {
            self.min_temp = 7.0;
        }
        if !self.max_temp.is_finite() {
            self.max_temp = 35.0;
        }
        if self.min_temp > self.max_temp {
            std::mem::swap(&mut self.min_temp, &mut self.max_temp);
        }

        self.target_temp = self
            .target_temp
            .filter(|temp| temp.is_finite())
            .map(|temp| temp.clamp(self.min_temp, self.max_temp));

        self.cold_tolerance = sanitize_tolerance(self.cold_tolerance);
        self.hot_tolerance = sanitize_tolerance(self.hot_tolerance);

        self.min_cycle_duration_ms = self.min_cycle_duration_ms.filter(|ms| *ms > 0);
        self.keep_alive_ms = self
            .keep_alive_ms
            .filter(|ms| *ms > 0)
            .map(|ms| ms.min(MAX_PERIOD_MS));
        if let Some(motion) = self.motion.as_mut() {
            motion.delay_ms = motion.delay_ms.min(MAX_PERIOD_MS);
        }

        if !self.proportional.bias.is_finite() {
            self.proportional.bias = ProportionalConfig::default().bias;
        }
        if !self.proportional.cycle_minutes.is_finite() || self.proportional.cycle_minutes <= 0.0 {
            self.proportional.cycle_minutes = ProportionalConfig::default().cycle_minutes;
        }
        let max_cycle_minutes = (MAX_PERIOD_MS / 60_000) as f32;
        self.proportional.cycle_minutes = self.proportional.cycle_minutes.min(max_cycle_minutes);

        self.power_guard = self
            .power_guard
            .take()
            .filter(|guard| guard.device_power.is_finite() && guard.device_power > 0.0);
    }

    /// Modes this configuration accepts: cooling-only or heating-only, plus off.
    pub fn modes(&self) -> [ControlMode; 2] {
        if self.ac_mode {
            [ControlMode::Cool, ControlMode::Off]
        } else {
            [ControlMode::Heat, ControlMode::Off]
        }
    }

    /// Target used when neither configuration nor persisted state provides one.
    pub fn fallback_target(&self) -> f32 {
        if self.ac_mode {
            self.max_temp
        } else {
            self.min_temp
        }
    }
}

fn sanitize_tolerance(value: f32) -> f32 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.3
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedSettings {
    #[serde(default)]
    pub target_temp: Option<f32>,
    #[serde(default)]
    pub preset: Preset,
    #[serde(default)]
    pub mode: Option<ControlMode>,
}

impl PersistedSettings {
    pub fn sanitize(&mut self) {
        self.target_temp = self.target_temp.filter(|temp| temp.is_finite());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
            client_id: "thermostat-controller".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub thermostat: ThermostatConfig,
    #[serde(default)]
    pub settings: Option<PersistedSettings>,
    #[serde(default)]
    pub mqtt: MqttConfig,
}
