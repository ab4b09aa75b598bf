use crate::types::{ControlMode, ControlTrigger};

/// Actuator command issued by a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

#[derive(Debug, Clone, Copy)]
pub struct ThresholdInput {
    pub current: f32,
    pub target: f32,
    pub cold_tolerance: f32,
    pub hot_tolerance: f32,
    pub mode: ControlMode,
    pub actuator_on: bool,
    pub power_exceeded: bool,
}

impl ThresholdInput {
    pub fn too_cold(&self) -> bool {
        self.target >= self.current + self.cold_tolerance
    }

    pub fn too_hot(&self) -> bool {
        self.current >= self.target + self.hot_tolerance
    }
}

/// Hysteresis decision. `None` means the reading sits inside the dead band
/// and nothing needs to be sent.
pub fn decide(input: &ThresholdInput, trigger: ControlTrigger) -> Option<Switch> {
    let too_cold = input.too_cold();
    let too_hot = input.too_hot();
    let keep_alive = trigger == ControlTrigger::KeepAlive;

    if input.actuator_on {
        let satisfied = match input.mode {
            ControlMode::Cool => too_cold,
            ControlMode::Heat => too_hot,
            ControlMode::Off => true,
        };
        if satisfied || input.power_exceeded {
            Some(Switch::Off)
        } else if keep_alive {
            Some(Switch::On)
        } else {
            None
        }
    } else {
        let demand = match input.mode {
            ControlMode::Cool => too_hot,
            ControlMode::Heat => too_cold,
            ControlMode::Off => false,
        };
        if demand && !input.power_exceeded {
            Some(Switch::On)
        } else if keep_alive {
            Some(Switch::Off)
        } else {
            None
        }
    }
}
