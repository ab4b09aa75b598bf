use crate::error::ThermostatError;

const UNAVAILABLE_PAYLOADS: [&str; 3] = ["", "unavailable", "unknown"];

/// Returns true for payloads a sensor publishes when it has no value.
pub fn is_unavailable(raw: &str) -> bool {
    let trimmed = raw.trim();
    UNAVAILABLE_PAYLOADS
        .iter()
        .any(|marker| trimmed.eq_ignore_ascii_case(marker))
}

/// Parses a sensor payload into a finite number.
pub fn parse_finite(raw: &str) -> Result<f32, ThermostatError> {
    let value = raw
        .trim()
        .parse::<f32>()
        .map_err(|_| ThermostatError::InvalidReading(raw.to_string()))?;

    if value.is_finite() {
        Ok(value)
    } else {
        Err(ThermostatError::InvalidReading(raw.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct TemperatureTracker {
    current: Option<f32>,
    target: f32,
}

impl TemperatureTracker {
    pub fn new(target: f32) -> Self {
        Self {
            current: None,
            target,
        }
    }

    pub fn current(&self) -> Option<f32> {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    /// Replaces the current temperature. A rejected reading leaves the last
    /// known value in place.
    pub fn update(&mut self, raw: &str) -> Result<f32, ThermostatError> {
        let value = parse_finite(raw)?;
        self.current = Some(value);
        Ok(value)
    }

    /// Signed distance to the target; positive when below it.
    pub fn error(&self) -> Option<f32> {
        self.current.map(|current| self.target - current)
    }
}
