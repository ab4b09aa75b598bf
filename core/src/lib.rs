pub mod config;
pub mod error;
pub mod power;
pub mod preset;
pub mod proportional;
pub mod service;
pub mod thermostat;
pub mod threshold;
pub mod topics;
pub mod tracker;
pub mod types;

pub use config::{
    MotionConfig, MqttConfig, PersistedSettings, PowerGuardConfig, ProportionalConfig,
    RuntimeConfig, ThermostatConfig,
};
pub use error::{ActuatorError, ThermostatError};
pub use preset::{Preset, PresetTable};
pub use proportional::{CycleTransition, DutyCycle, ProportionalCycle};
pub use service::{Actuator, ThermostatService};
pub use thermostat::{EngineAction, ThermostatEngine};
pub use topics::*;
pub use types::{
    Algorithm, ControlMode, ControlTrigger, CyclePhase, HvacAction, ResponseCurve,
    ThermostatStatus,
};
