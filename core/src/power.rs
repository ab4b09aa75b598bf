use tracing::{debug, warn};

use crate::{error::ThermostatError, tracker::parse_finite};

/// Interlock that withholds heat when the household power budget would be
/// exceeded by switching the device on.
#[derive(Debug, Clone)]
pub struct PowerGuard {
    current_power: Option<f32>,
    power_ceiling: Option<f32>,
    device_power: f32,
}

impl PowerGuard {
    pub fn new(device_power: f32) -> Self {
        Self {
            current_power: None,
            power_ceiling: None,
            device_power,
        }
    }

    pub fn current_power(&self) -> Option<f32> {
        self.current_power
    }

    pub fn power_ceiling(&self) -> Option<f32> {
        self.power_ceiling
    }

    pub fn update_power(&mut self, raw: &str) -> Result<f32, ThermostatError> {
        let value = parse_finite(raw)?;
        self.current_power = Some(value);
        Ok(value)
    }

    pub fn update_ceiling(&mut self, raw: &str) -> Result<f32, ThermostatError> {
        let value = parse_finite(raw)?;
        self.power_ceiling = Some(value);
        Ok(value)
    }

    pub fn is_armed(&self) -> bool {
        self.current_power.is_some() && self.power_ceiling.is_some()
    }

    pub fn exceeded(&self) -> bool {
        let (Some(current), Some(ceiling)) = (self.current_power, self.power_ceiling) else {
            return false;
        };

        debug!(
            current_power = current,
            power_ceiling = ceiling,
            device_power = self.device_power,
            "checking power budget"
        );

        let exceeded = current + self.device_power >= ceiling;
        if exceeded {
            warn!(
                "power ceiling {ceiling} would be exceeded ({current} + {})",
                self.device_power
            );
        }
        exceeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unarmed_guard_never_blocks() {
        let mut guard = PowerGuard::new(2_000.0);
        assert!(!guard.exceeded());

        guard.update_power("9000").unwrap();
        assert!(!guard.is_armed());
        assert!(!guard.exceeded());

        let mut ceiling_only = PowerGuard::new(2_000.0);
        ceiling_only.update_ceiling("100").unwrap();
        assert!(!ceiling_only.exceeded());
    }

    #[test]
    fn blocks_at_or_above_ceiling() {
        let mut guard = PowerGuard::new(1_000.0);
        guard.update_ceiling("6000").unwrap();

        guard.update_power("4999").unwrap();
        assert!(!guard.exceeded());

        guard.update_power("5000").unwrap();
        assert!(guard.exceeded());
    }

    #[test]
    fn invalid_reading_keeps_previous_value() {
        let mut guard = PowerGuard::new(500.0);
        guard.update_power("1200").unwrap();
        assert!(guard.update_power("NaN").is_err());
        assert_eq!(guard.current_power(), Some(1200.0));
    }
}
