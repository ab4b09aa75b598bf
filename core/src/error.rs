use thiserror::Error;

use crate::preset::Preset;

/// Failure reported by an [`Actuator`](crate::service::Actuator) command.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ActuatorError(pub String);

impl ActuatorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum ThermostatError {
    #[error("invalid sensor reading {0:?}")]
    InvalidReading(String),

    #[error("actuator {command} command failed")]
    ActuatorCommandFailed {
        command: &'static str,
        #[source]
        source: ActuatorError,
    },

    #[error("unsupported preset {requested}, expected one of {available:?}")]
    UnsupportedPresetRequested {
        requested: String,
        available: Vec<Preset>,
    },

    #[error("unrecognized mode {0:?}")]
    UnrecognizedMode(String),

    #[error("condition cannot be evaluated: {0}")]
    ConditionEvaluationFailed(&'static str),
}
