use tracing::{debug, info, warn};

use crate::{
    config::{PersistedSettings, ThermostatConfig},
    error::ThermostatError,
    power::PowerGuard,
    preset::{Preset, PresetTable},
    proportional::{CycleTransition, DutyCycle, ProportionalCycle},
    threshold::{self, Switch, ThresholdInput},
    tracker::{is_unavailable, TemperatureTracker},
    types::{Algorithm, ControlMode, ControlTrigger, HvacAction, ThermostatStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAction {
    TurnOn,
    TurnOff,
    ArmCycleTimer { at_ms: u64 },
    CancelCycleTimer,
    ArmMotionTimer { at_ms: u64 },
}

#[derive(Debug, Clone, Copy)]
struct MotionState {
    detected: bool,
    since_ms: u64,
}

/// Decision core for one thermostat. Every entry point takes the current
/// monotonic time and returns the actions the caller must carry out, in order.
#[derive(Debug, Clone)]
pub struct ThermostatEngine {
    pub config: ThermostatConfig,
    presets: PresetTable,

    tracker: TemperatureTracker,
    power_guard: Option<PowerGuard>,
    cycle: Option<ProportionalCycle>,

    mode: ControlMode,
    saved_mode: Option<ControlMode>,
    preset: Preset,
    saved_target: f32,

    active: bool,
    actuator_on: bool,
    actuator_seen: bool,
    last_transition_ms: Option<u64>,

    window_open: Option<bool>,
    motion: Option<MotionState>,
}

impl ThermostatEngine {
    pub fn new(mut config: ThermostatConfig, persisted: Option<PersistedSettings>) -> Self {
        config.sanitize();
        let persisted = persisted.map(|mut settings| {
            settings.sanitize();
            settings
        });

        let presets = PresetTable::new(config.presets.clone(), config.motion.clone());
        if config.motion.is_some() && !presets.supports_motion() {
            warn!(
                "{} - motion control disabled: motion presets must be configured and delay positive",
                config.name
            );
        }

        let target = match (config.target_temp, &persisted) {
            (Some(target), _) => target,
            (None, Some(PersistedSettings {
                target_temp: Some(target),
                ..
            })) => *target,
            (None, Some(_)) => {
                let fallback = config.fallback_target();
                warn!("undefined target temperature, falling back to {fallback}");
                fallback
            }
            (None, None) => {
                let fallback = config.fallback_target();
                warn!("no previously saved temperature, setting to {fallback}");
                fallback
            }
        };

        let preset = persisted
            .as_ref()
            .map(|settings| settings.preset)
            .filter(|preset| presets.contains(*preset))
            .unwrap_or(Preset::None);

        let modes = config.modes();
        let supported = |mode: &ControlMode| {
            let supported = modes.contains(mode);
            if !supported {
                warn!("{} - ignoring unsupported mode {mode}", config.name);
            }
            supported
        };
        let mode = config
            .initial_mode
            .filter(|mode| supported(mode))
            .or_else(|| {
                persisted
                    .as_ref()
                    .and_then(|settings| settings.mode)
                    .filter(|mode| supported(mode))
            })
            .unwrap_or(ControlMode::Off);

        let saved_target = config
            .target_temp
            .or_else(|| presets.first_temperature())
            .unwrap_or(target);

        let power_guard = config
            .power_guard
            .as_ref()
            .map(|guard| PowerGuard::new(guard.device_power));

        if config.algorithm == Algorithm::Proportional {
            info!(
                "{} - algorithm {} with bias {}, curve {:?} and {} minute cycle",
                config.name,
                config.algorithm.as_str(),
                config.proportional.bias,
                config.proportional.curve,
                config.proportional.cycle_minutes
            );
        }

        Self {
            config,
            presets,
            tracker: TemperatureTracker::new(target),
            power_guard,
            cycle: None,
            mode,
            saved_mode: Some(mode),
            preset,
            saved_target,
            active: false,
            actuator_on: false,
            actuator_seen: false,
            last_transition_ms: None,
            window_open: None,
            motion: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn preset(&self) -> Preset {
        self.preset
    }

    pub fn target_temp(&self) -> f32 {
        self.tracker.target()
    }

    pub fn current_temp(&self) -> Option<f32> {
        self.tracker.current()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_actuator_on(&self) -> bool {
        self.actuator_on
    }

    pub fn cycle(&self) -> Option<&ProportionalCycle> {
        self.cycle.as_ref()
    }

    pub fn settings(&self) -> PersistedSettings {
        PersistedSettings {
            target_temp: Some(self.tracker.target()),
            preset: self.preset,
            mode: Some(self.mode),
        }
    }

    pub fn hvac_action(&self) -> HvacAction {
        if self.mode == ControlMode::Off {
            HvacAction::Off
        } else if !self.actuator_on {
            HvacAction::Idle
        } else if self.config.ac_mode {
            HvacAction::Cooling
        } else {
            HvacAction::Heating
        }
    }

    pub fn power_exceeded(&self) -> bool {
        self.power_guard
            .as_ref()
            .map(PowerGuard::exceeded)
            .unwrap_or(false)
    }

    pub fn update_temperature(
        &mut self,
        raw: &str,
        now_ms: u64,
    ) -> Result<Vec<EngineAction>, ThermostatError> {
        if is_unavailable(raw) {
            return Ok(Vec::new());
        }
        let value = self.tracker.update(raw)?;
        debug!("{} - temperature updated to {value}", self.config.name);
        Ok(self.control(ControlTrigger::Event, now_ms))
    }

    /// Power readings only refresh the guard; the next natural control pass
    /// picks them up.
    pub fn update_power(&mut self, raw: &str) -> Result<(), ThermostatError> {
        match self.power_guard.as_mut() {
            Some(guard) if !is_unavailable(raw) => guard.update_power(raw).map(|_| ()),
            _ => Ok(()),
        }
    }

    pub fn update_power_ceiling(&mut self, raw: &str) -> Result<(), ThermostatError> {
        match self.power_guard.as_mut() {
            Some(guard) if !is_unavailable(raw) => guard.update_ceiling(raw).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Authoritative actuator state reported by the device.
    pub fn observe_actuator(&mut self, on: bool, now_ms: u64) -> Vec<EngineAction> {
        let first = !self.actuator_seen;
        self.actuator_seen = true;
        if !first && on == self.actuator_on {
            return Vec::new();
        }

        self.actuator_on = on;
        self.last_transition_ms = Some(now_ms);

        if self.mode == ControlMode::Off && on {
            warn!(
                "{} - mode is off but the actuator is on, turning it off",
                self.config.name
            );
            return vec![EngineAction::TurnOff];
        }
        Vec::new()
    }

    /// Records a command the actuator accepted.
    pub fn record_actuator(&mut self, on: bool, now_ms: u64) {
        if on != self.actuator_on || self.last_transition_ms.is_none() {
            self.last_transition_ms = Some(now_ms);
        }
        self.actuator_on = on;
        self.actuator_seen = true;
    }

    pub fn control(&mut self, trigger: ControlTrigger, now_ms: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        if !self.active && self.tracker.current().is_some() && self.tracker.target().is_finite() {
            self.active = true;
            info!(
                "{} - obtained current and target temperature, thermostat active ({:?}, {})",
                self.config.name,
                self.tracker.current(),
                self.tracker.target()
            );
        }

        if !self.active || self.mode == ControlMode::Off {
            debug!("{} - mode is off or inactive", self.config.name);
            if self.mode == ControlMode::Off {
                self.reset_cycle(&mut actions);
            }
            return actions;
        }

        if trigger == ControlTrigger::Event {
            if let Some(min_cycle_ms) = self.config.min_cycle_duration_ms {
                match self.held_long_enough(min_cycle_ms, now_ms) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(
                            "{} - actuator changed less than {min_cycle_ms} ms ago, skipping",
                            self.config.name
                        );
                        return actions;
                    }
                    Err(err) => {
                        warn!("{} - {err}, skipping", self.config.name);
                        return actions;
                    }
                }
            }
        }

        match self.config.algorithm {
            Algorithm::Threshold => self.control_threshold(trigger, &mut actions),
            Algorithm::Proportional => self.run_cycle(now_ms, &mut actions),
        }

        actions
    }

    /// Phase timer expiry. Runs the cycle directly; the minimum cycle duration
    /// does not apply to the duty cycle's own boundaries.
    pub fn cycle_timer_elapsed(&mut self, now_ms: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        if self.config.algorithm == Algorithm::Proportional {
            self.run_cycle(now_ms, &mut actions);
        }
        actions
    }

    pub fn set_target_temp(
        &mut self,
        temp: f32,
        now_ms: u64,
    ) -> Result<Vec<EngineAction>, ThermostatError> {
        if !temp.is_finite() {
            return Err(ThermostatError::InvalidReading(temp.to_string()));
        }
        let clamped = temp.clamp(self.config.min_temp, self.config.max_temp);
        info!("{} - set target temperature {clamped}", self.config.name);

        self.tracker.set_target(clamped);
        self.preset = Preset::None;
        Ok(self.control(ControlTrigger::Forced, now_ms))
    }

    pub fn set_mode(
        &mut self,
        mode: ControlMode,
        now_ms: u64,
    ) -> Result<Vec<EngineAction>, ThermostatError> {
        if !self.config.modes().contains(&mode) {
            return Err(ThermostatError::UnrecognizedMode(mode.to_string()));
        }
        info!("{} - set mode {mode}", self.config.name);

        self.mode = mode;
        if mode == ControlMode::Off {
            let mut actions = Vec::new();
            self.reset_cycle(&mut actions);
            if self.actuator_on {
                actions.push(EngineAction::TurnOff);
            }
            return Ok(actions);
        }

        Ok(self.control(ControlTrigger::Forced, now_ms))
    }

    pub fn set_preset(
        &mut self,
        preset: Preset,
        now_ms: u64,
    ) -> Result<Vec<EngineAction>, ThermostatError> {
        if !self.presets.contains(preset) {
            return Err(ThermostatError::UnsupportedPresetRequested {
                requested: preset.as_str().to_string(),
                available: self.presets.available(),
            });
        }
        if preset == self.preset {
            return Ok(Vec::new());
        }

        let target = match preset {
            Preset::None => self.saved_target,
            other => {
                if self.preset == Preset::None {
                    self.saved_target = self.tracker.target();
                }
                self.presets
                    .temperature(other)
                    .unwrap_or_else(|| self.tracker.target())
            }
        };
        info!(
            "{} - set preset {} with target {target}",
            self.config.name,
            preset.as_str()
        );

        self.preset = preset;
        self.tracker.set_target(target);
        Ok(self.control(ControlTrigger::Forced, now_ms))
    }

    pub fn available_presets(&self) -> Vec<Preset> {
        self.presets.available()
    }

    pub fn parse_preset(&self, name: &str) -> Result<Preset, ThermostatError> {
        self.presets.parse(name)
    }

    /// Opening a window parks the thermostat in `Off`; closing it restores the
    /// mode that was active before.
    pub fn window_changed(
        &mut self,
        open: bool,
        now_ms: u64,
    ) -> Result<Vec<EngineAction>, ThermostatError> {
        let previous = self.window_open.replace(open);
        if previous.is_none() || previous == Some(open) {
            return Ok(Vec::new());
        }

        if open {
            info!("{} - window opened", self.config.name);
            self.saved_mode = Some(self.mode);
            self.set_mode(ControlMode::Off, now_ms)
        } else {
            let restore = self.saved_mode.unwrap_or(self.mode);
            info!("{} - window closed, restoring {restore}", self.config.name);
            self.set_mode(restore, now_ms)
        }
    }

    pub fn motion_changed(&mut self, detected: bool, now_ms: u64) -> Vec<EngineAction> {
        if self.motion.map(|motion| motion.detected) != Some(detected) {
            self.motion = Some(MotionState {
                detected,
                since_ms: now_ms,
            });
        }

        if self.preset != Preset::Activity {
            return Vec::new();
        }
        let Some(delay_ms) = self.presets.motion().map(|motion| motion.delay_ms) else {
            return Vec::new();
        };

        if detected {
            if let Some(target) = self.presets.motion_temperature(true) {
                info!("{} - motion detected, target {target}", self.config.name);
                self.tracker.set_target(target);
            }
            self.control(ControlTrigger::Event, now_ms)
        } else {
            vec![EngineAction::ArmMotionTimer {
                at_ms: now_ms.saturating_add(delay_ms),
            }]
        }
    }

    pub fn motion_delay_elapsed(&mut self, now_ms: u64) -> Vec<EngineAction> {
        if self.preset != Preset::Activity {
            return Vec::new();
        }
        let Some(delay_ms) = self.presets.motion().map(|motion| motion.delay_ms) else {
            return Vec::new();
        };

        match self.no_motion_for(delay_ms, now_ms) {
            Ok(true) => {}
            Ok(false) => return Vec::new(),
            Err(err) => {
                warn!("{} - {err}", self.config.name);
                return Vec::new();
            }
        }

        if let Some(target) = self.presets.motion_temperature(false) {
            info!("{} - no motion, target {target}", self.config.name);
            self.tracker.set_target(target);
        }
        self.control(ControlTrigger::Event, now_ms)
    }

    pub fn status(&self, now_ms: u64) -> ThermostatStatus {
        let cycle = self
            .cycle
            .as_ref()
            .filter(|_| self.config.algorithm == Algorithm::Proportional);
        let duty = cycle.and_then(ProportionalCycle::duty);

        ThermostatStatus {
            name: self.config.name.clone(),
            current_temp: self.tracker.current(),
            target_temp: self.tracker.target(),
            min_temp: self.config.min_temp,
            max_temp: self.config.max_temp,
            mode: self.mode.as_str(),
            modes: self.config.modes().iter().map(|mode| mode.as_str()).collect(),
            preset: self.preset.as_str(),
            presets: self
                .presets
                .available()
                .into_iter()
                .map(Preset::as_str)
                .collect(),
            action: self.hvac_action().as_str(),
            active: self.active,
            actuator_on: self.actuator_on,
            algorithm: self.config.algorithm.as_str(),
            phase: cycle.map(|cycle| cycle.phase().as_str()),
            on_fraction: duty.map(|duty| duty.on_fraction),
            on_duration_sec: duty.map(|duty| duty.on_duration_sec),
            off_duration_sec: duty.map(|duty| duty.off_duration_sec),
            phase_remaining_ms: cycle.map(|cycle| cycle.remaining_ms(now_ms)).unwrap_or(0),
            current_power: self.power_guard.as_ref().and_then(PowerGuard::current_power),
            power_ceiling: self.power_guard.as_ref().and_then(PowerGuard::power_ceiling),
            power_exceeded: self.power_exceeded(),
            window_open: self.window_open,
        }
    }

    fn held_long_enough(&self, min_cycle_ms: u64, now_ms: u64) -> Result<bool, ThermostatError> {
        let last = self
            .last_transition_ms
            .ok_or(ThermostatError::ConditionEvaluationFailed(
                "actuator state history unavailable",
            ))?;
        Ok(now_ms.saturating_sub(last) >= min_cycle_ms)
    }

    fn no_motion_for(&self, delay_ms: u64, now_ms: u64) -> Result<bool, ThermostatError> {
        let motion = self
            .motion
            .ok_or(ThermostatError::ConditionEvaluationFailed(
                "motion state history unavailable",
            ))?;
        Ok(!motion.detected && now_ms.saturating_sub(motion.since_ms) >= delay_ms)
    }

    fn reset_cycle(&mut self, actions: &mut Vec<EngineAction>) {
        if let Some(cycle) = self.cycle.as_mut() {
            if cycle.reset() {
                actions.push(EngineAction::CancelCycleTimer);
            }
        }
    }

    fn control_threshold(&mut self, trigger: ControlTrigger, actions: &mut Vec<EngineAction>) {
        let Some(current) = self.tracker.current() else {
            return;
        };

        let input = ThresholdInput {
            current,
            target: self.tracker.target(),
            cold_tolerance: self.config.cold_tolerance,
            hot_tolerance: self.config.hot_tolerance,
            mode: self.mode,
            actuator_on: self.actuator_on,
            power_exceeded: self.power_exceeded(),
        };

        let keep_alive = if trigger == ControlTrigger::KeepAlive {
            "keep-alive - "
        } else {
            ""
        };
        match threshold::decide(&input, trigger) {
            Some(Switch::On) => {
                info!("{} - {keep_alive}turning actuator on", self.config.name);
                actions.push(EngineAction::TurnOn);
            }
            Some(Switch::Off) => {
                info!("{} - {keep_alive}turning actuator off", self.config.name);
                actions.push(EngineAction::TurnOff);
            }
            None => {}
        }
    }

    fn run_cycle(&mut self, now_ms: u64, actions: &mut Vec<EngineAction>) {
        let running = self.active && self.mode != ControlMode::Off;
        let actuator_on = self.actuator_on;
        let name = &self.config.name;
        let proportional = &self.config.proportional;
        let guard = self.power_guard.as_ref();
        let error = self.tracker.error().unwrap_or(0.0);

        let cycle = self.cycle.get_or_insert_with(ProportionalCycle::new);
        let transition = cycle.advance(now_ms, running, actuator_on, || {
            let exceeded = guard.map(PowerGuard::exceeded).unwrap_or(false);
            let duty = DutyCycle::calculate(error, proportional, exceeded);
            if exceeded {
                info!("{name} - power exceeded, no heating period");
            } else if duty.on_duration_sec == 0.0 && duty.on_fraction > 0.0 {
                info!("{name} - heating period below minimum, skipping");
            }
            info!(
                "{name} - duty {:.3}, on {:.0} s, off {:.0} s",
                duty.on_fraction, duty.on_duration_sec, duty.off_duration_sec
            );
            duty
        });

        match transition {
            CycleTransition::Halted => {
                info!("{name} - thermostat stopped, turning actuator off");
                actions.push(EngineAction::TurnOff);
                actions.push(EngineAction::CancelCycleTimer);
            }
            CycleTransition::Idle { turn_off } => {
                if turn_off {
                    info!("{name} - no heating needed, turning actuator off");
                    actions.push(EngineAction::TurnOff);
                }
            }
            CycleTransition::EnteredOn { until_ms } => {
                info!("{name} - on phase until {until_ms} ms");
                actions.push(EngineAction::TurnOn);
                actions.push(EngineAction::ArmCycleTimer { at_ms: until_ms });
            }
            CycleTransition::EnteredOff { until_ms } => {
                info!("{name} - off phase until {until_ms} ms");
                actions.push(EngineAction::TurnOff);
                actions.push(EngineAction::ArmCycleTimer { at_ms: until_ms });
            }
            CycleTransition::Waiting { until_ms } => {
                debug!("{name} - waiting for phase end at {until_ms} ms");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::{MotionConfig, PowerGuardConfig, MAX_PERIOD_MS},
        types::CyclePhase,
    };

    fn heat_config() -> ThermostatConfig {
        ThermostatConfig {
            target_temp: Some(21.0),
            initial_mode: Some(ControlMode::Heat),
            ..ThermostatConfig::default()
        }
    }

    fn proportional_config() -> ThermostatConfig {
        ThermostatConfig {
            algorithm: Algorithm::Proportional,
            ..heat_config()
        }
    }

    fn engine(config: ThermostatConfig) -> ThermostatEngine {
        let mut engine = ThermostatEngine::new(config, None);
        engine.observe_actuator(false, 0);
        engine
    }

    #[test]
    fn threshold_turns_on_when_too_cold() {
        let mut engine = engine(heat_config());

        let actions = engine.update_temperature("20.5", 1_000).unwrap();

        assert_eq!(actions, vec![EngineAction::TurnOn]);
        assert!(engine.is_active());
    }

    #[test]
    fn inactive_until_temperature_known() {
        let mut engine = engine(heat_config());

        assert!(engine.control(ControlTrigger::Forced, 0).is_empty());
        assert!(engine.control(ControlTrigger::KeepAlive, 0).is_empty());
        assert!(!engine.is_active());

        assert!(engine.update_temperature("unavailable", 0).unwrap().is_empty());
        assert!(!engine.is_active());
    }

    #[test]
    fn invalid_reading_is_rejected_without_acting() {
        let mut engine = engine(heat_config());
        engine.update_temperature("22", 0).unwrap();

        let err = engine.update_temperature("NaN", 10).unwrap_err();

        assert!(matches!(err, ThermostatError::InvalidReading(_)));
        assert_eq!(engine.current_temp(), Some(22.0));
    }

    #[test]
    fn min_cycle_duration_makes_repeat_events_idempotent() {
        let mut engine = engine(ThermostatConfig {
            min_cycle_duration_ms: Some(300_000),
            ..heat_config()
        });

        let actions = engine.update_temperature("20.0", 400_000).unwrap();
        assert_eq!(actions, vec![EngineAction::TurnOn]);
        engine.record_actuator(true, 400_000);

        assert!(engine.update_temperature("20.0", 400_001).unwrap().is_empty());
        assert!(engine.control(ControlTrigger::Event, 400_002).is_empty());
    }

    #[test]
    fn min_cycle_without_history_abstains() {
        let mut engine = ThermostatEngine::new(
            ThermostatConfig {
                min_cycle_duration_ms: Some(60_000),
                ..heat_config()
            },
            None,
        );

        assert!(engine.update_temperature("18", 1_000_000).unwrap().is_empty());
        assert_eq!(
            engine.control(ControlTrigger::Forced, 1_000_000),
            vec![EngineAction::TurnOn]
        );
    }

    #[test]
    fn keep_alive_bypasses_min_cycle_and_reaffirms() {
        let mut engine = engine(ThermostatConfig {
            min_cycle_duration_ms: Some(300_000),
            ..heat_config()
        });
        engine.update_temperature("21.0", 1_000).unwrap();

        assert_eq!(
            engine.control(ControlTrigger::KeepAlive, 2_000),
            vec![EngineAction::TurnOff]
        );
    }

    #[test]
    fn mode_off_turns_actuator_off_and_silences_keep_alive() {
        let mut engine = engine(proportional_config());
        let actions = engine.update_temperature("19.0", 0).unwrap();
        assert_eq!(
            actions,
            vec![
                EngineAction::TurnOn,
                EngineAction::ArmCycleTimer { at_ms: 225_000 }
            ]
        );
        engine.record_actuator(true, 0);

        let actions = engine.set_mode(ControlMode::Off, 10_000).unwrap();

        assert_eq!(
            actions,
            vec![EngineAction::CancelCycleTimer, EngineAction::TurnOff]
        );
        assert_eq!(engine.cycle().map(ProportionalCycle::phase), Some(CyclePhase::None));
        engine.record_actuator(false, 10_000);
        assert!(engine.control(ControlTrigger::KeepAlive, 20_000).is_empty());
        assert!(engine.control(ControlTrigger::KeepAlive, 30_000).is_empty());
    }

    #[test]
    fn cool_is_rejected_on_heating_configuration() {
        let mut engine = engine(heat_config());
        let err = engine.set_mode(ControlMode::Cool, 0).unwrap_err();

        assert!(matches!(err, ThermostatError::UnrecognizedMode(_)));
        assert_eq!(engine.mode(), ControlMode::Heat);
    }

    #[test]
    fn proportional_enters_on_phase_for_linear_duty() {
        let mut engine = engine(proportional_config());

        let actions = engine.update_temperature("19.0", 5_000).unwrap();

        assert_eq!(
            actions,
            vec![
                EngineAction::TurnOn,
                EngineAction::ArmCycleTimer { at_ms: 230_000 }
            ]
        );
        let status = engine.status(5_000);
        assert_eq!(status.phase, Some("on"));
        assert_eq!(status.on_duration_sec, Some(225.0));
        assert_eq!(status.off_duration_sec, Some(75.0));
        assert_eq!(status.phase_remaining_ms, 225_000);
    }

    #[test]
    fn proportional_short_period_stays_idle() {
        let mut engine = ThermostatEngine::new(proportional_config(), None);
        engine.observe_actuator(true, 0);

        // 0.25 * (21 - 21.92) + 0.25 = 0.02 -> 6 s
        let actions = engine.update_temperature("21.92", 1_000).unwrap();

        assert_eq!(actions, vec![EngineAction::TurnOff]);
        assert_eq!(engine.cycle().map(ProportionalCycle::phase), Some(CyclePhase::None));
        assert_eq!(engine.cycle().and_then(ProportionalCycle::phase_end_at_ms), None);
    }

    #[test]
    fn proportional_ignores_events_mid_phase() {
        let mut engine = engine(proportional_config());
        engine.update_temperature("19.0", 0).unwrap();
        engine.record_actuator(true, 0);

        assert!(engine.update_temperature("15.0", 60_000).unwrap().is_empty());
        assert!(engine.control(ControlTrigger::Forced, 61_000).is_empty());
    }

    #[test]
    fn power_exceeded_during_off_phase_reenters_off() {
        let mut engine = engine(ThermostatConfig {
            power_guard: Some(PowerGuardConfig {
                device_power: 1_000.0,
            }),
            ..proportional_config()
        });
        engine.update_power_ceiling("5000").unwrap();
        engine.update_power("1000").unwrap();

        engine.update_temperature("19.0", 0).unwrap();
        engine.record_actuator(true, 0);

        assert_eq!(
            engine.cycle_timer_elapsed(225_000),
            vec![
                EngineAction::TurnOff,
                EngineAction::ArmCycleTimer { at_ms: 300_000 }
            ]
        );
        engine.record_actuator(false, 225_000);

        engine.update_power("4500").unwrap();
        assert_eq!(
            engine.cycle_timer_elapsed(300_000),
            vec![
                EngineAction::TurnOff,
                EngineAction::ArmCycleTimer { at_ms: 600_000 }
            ]
        );
        assert_eq!(engine.cycle().map(ProportionalCycle::phase), Some(CyclePhase::Off));
    }

    #[test]
    fn power_updates_never_trigger_control() {
        let mut engine = engine(ThermostatConfig {
            power_guard: Some(PowerGuardConfig { device_power: 500.0 }),
            ..heat_config()
        });
        engine.update_temperature("21.0", 0).unwrap();

        assert!(engine.update_power("unknown").is_ok());
        assert!(engine.update_power("abc").is_err());
        engine.update_power("100").unwrap();
        engine.update_power_ceiling("200").unwrap();
        assert!(engine.power_exceeded());

        assert!(engine.update_temperature("15.0", 10).unwrap().is_empty());
    }

    #[test]
    fn stale_cycle_timer_after_mode_off_halts() {
        let mut engine = engine(proportional_config());
        engine.update_temperature("19.0", 0).unwrap();
        engine.record_actuator(true, 0);
        engine.mode = ControlMode::Off;

        assert_eq!(
            engine.cycle_timer_elapsed(225_000),
            vec![EngineAction::TurnOff, EngineAction::CancelCycleTimer]
        );
    }

    #[test]
    fn actuator_turned_on_externally_while_off_is_reverted() {
        let mut engine = ThermostatEngine::new(
            ThermostatConfig {
                initial_mode: Some(ControlMode::Off),
                ..heat_config()
            },
            None,
        );

        assert_eq!(engine.observe_actuator(true, 0), vec![EngineAction::TurnOff]);
        engine.record_actuator(false, 1);
        assert!(engine.observe_actuator(false, 2).is_empty());
        assert_eq!(engine.observe_actuator(true, 3), vec![EngineAction::TurnOff]);
    }

    #[test]
    fn presets_save_and_restore_manual_target() {
        let mut engine = engine(ThermostatConfig {
            presets: BTreeMap::from([(Preset::Eco, 17.0), (Preset::Comfort, 22.0)]),
            ..heat_config()
        });
        engine.set_target_temp(20.0, 0).unwrap();

        engine.set_preset(Preset::Eco, 1).unwrap();
        assert_eq!(engine.target_temp(), 17.0);
        engine.set_preset(Preset::Comfort, 2).unwrap();
        assert_eq!(engine.target_temp(), 22.0);

        engine.set_preset(Preset::None, 3).unwrap();
        assert_eq!(engine.target_temp(), 20.0);
        assert_eq!(engine.preset(), Preset::None);

        let err = engine.set_preset(Preset::Away, 4).unwrap_err();
        assert!(matches!(
            err,
            ThermostatError::UnsupportedPresetRequested { .. }
        ));
        assert_eq!(engine.target_temp(), 20.0);
    }

    #[test]
    fn set_target_resets_preset_and_clamps() {
        let mut engine = engine(ThermostatConfig {
            presets: BTreeMap::from([(Preset::Eco, 17.0)]),
            ..heat_config()
        });
        engine.set_preset(Preset::Eco, 0).unwrap();

        engine.set_target_temp(80.0, 1).unwrap();

        assert_eq!(engine.target_temp(), 35.0);
        assert_eq!(engine.preset(), Preset::None);
        assert!(engine.set_target_temp(f32::NAN, 2).is_err());
    }

    #[test]
    fn activity_preset_follows_motion() {
        let mut engine = engine(ThermostatConfig {
            presets: BTreeMap::from([(Preset::Eco, 17.0), (Preset::Comfort, 21.5)]),
            motion: Some(MotionConfig {
                motion_preset: Preset::Comfort,
                no_motion_preset: Preset::Eco,
                delay_ms: 60_000,
            }),
            ..heat_config()
        });
        engine.set_preset(Preset::Activity, 0).unwrap();
        assert_eq!(engine.target_temp(), 17.0);

        engine.motion_changed(true, 1_000);
        assert_eq!(engine.target_temp(), 21.5);

        assert_eq!(
            engine.motion_changed(false, 10_000),
            vec![EngineAction::ArmMotionTimer { at_ms: 70_000 }]
        );

        engine.motion_changed(true, 20_000);
        engine.motion_delay_elapsed(70_000);
        assert_eq!(engine.target_temp(), 21.5);

        engine.motion_changed(false, 80_000);
        engine.motion_delay_elapsed(140_000);
        assert_eq!(engine.target_temp(), 17.0);
    }

    #[test]
    fn huge_motion_delay_is_capped() {
        let mut engine = engine(ThermostatConfig {
            presets: BTreeMap::from([(Preset::Eco, 17.0), (Preset::Comfort, 21.5)]),
            motion: Some(MotionConfig {
                motion_preset: Preset::Comfort,
                no_motion_preset: Preset::Eco,
                delay_ms: u64::MAX,
            }),
            ..heat_config()
        });
        engine.set_preset(Preset::Activity, 0).unwrap();

        assert_eq!(
            engine.motion_changed(false, 10),
            vec![EngineAction::ArmMotionTimer {
                at_ms: 10 + MAX_PERIOD_MS
            }]
        );
    }

    #[test]
    fn motion_delay_without_history_is_not_satisfied() {
        let mut engine = engine(ThermostatConfig {
            presets: BTreeMap::from([(Preset::Eco, 17.0), (Preset::Comfort, 21.5)]),
            motion: Some(MotionConfig {
                motion_preset: Preset::Comfort,
                no_motion_preset: Preset::Eco,
                delay_ms: 60_000,
            }),
            ..heat_config()
        });
        engine.set_preset(Preset::Activity, 0).unwrap();
        engine.tracker.set_target(19.0);

        assert!(engine.motion_delay_elapsed(500_000).is_empty());
        assert_eq!(engine.target_temp(), 19.0);
    }

    #[test]
    fn window_parks_and_restores_mode() {
        let mut engine = engine(heat_config());
        engine.update_temperature("19.0", 0).unwrap();
        engine.record_actuator(true, 0);

        assert!(engine.window_changed(false, 1).unwrap().is_empty());
        assert_eq!(
            engine.window_changed(true, 2).unwrap(),
            vec![EngineAction::TurnOff]
        );
        assert_eq!(engine.mode(), ControlMode::Off);
        engine.record_actuator(false, 2);

        assert_eq!(
            engine.window_changed(false, 3).unwrap(),
            vec![EngineAction::TurnOn]
        );
        assert_eq!(engine.mode(), ControlMode::Heat);
    }

    #[test]
    fn restores_persisted_settings() {
        let engine = ThermostatEngine::new(
            ThermostatConfig {
                presets: BTreeMap::from([(Preset::Away, 15.0)]),
                ..ThermostatConfig::default()
            },
            Some(PersistedSettings {
                target_temp: Some(19.5),
                preset: Preset::Away,
                mode: Some(ControlMode::Heat),
            }),
        );

        assert_eq!(engine.target_temp(), 19.5);
        assert_eq!(engine.preset(), Preset::Away);
        assert_eq!(engine.mode(), ControlMode::Heat);
    }

    #[test]
    fn unsupported_initial_mode_falls_back_to_persisted_mode() {
        let engine = ThermostatEngine::new(
            ThermostatConfig {
                initial_mode: Some(ControlMode::Cool),
                ..ThermostatConfig::default()
            },
            Some(PersistedSettings {
                target_temp: Some(20.0),
                preset: Preset::None,
                mode: Some(ControlMode::Heat),
            }),
        );

        assert_eq!(engine.mode(), ControlMode::Heat);
    }

    #[test]
    fn falls_back_to_temperature_bounds() {
        let heat = ThermostatEngine::new(ThermostatConfig::default(), None);
        assert_eq!(heat.target_temp(), 7.0);
        assert_eq!(heat.mode(), ControlMode::Off);

        let cool = ThermostatEngine::new(
            ThermostatConfig {
                ac_mode: true,
                ..ThermostatConfig::default()
            },
            Some(PersistedSettings {
                target_temp: None,
                preset: Preset::Eco,
                mode: Some(ControlMode::Heat),
            }),
        );
        assert_eq!(cool.target_temp(), 35.0);
        assert_eq!(cool.preset(), Preset::None);
        assert_eq!(cool.mode(), ControlMode::Off);
    }

    #[test]
    fn hvac_action_reflects_mode_and_actuator() {
        let mut engine = engine(heat_config());
        assert_eq!(engine.hvac_action(), HvacAction::Idle);
        engine.record_actuator(true, 0);
        assert_eq!(engine.hvac_action(), HvacAction::Heating);
        engine.set_mode(ControlMode::Off, 1).unwrap();
        assert_eq!(engine.hvac_action(), HvacAction::Off);
    }
}
