use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use tracing::debug;

use thermostat_core::{Actuator, ActuatorError, TOPIC_ACTUATOR_CMD};

/// Drives a relay listening on the actuator command topic. The relay reports
/// its real state back on the actuator state topic.
#[derive(Clone)]
pub struct MqttActuator {
    mqtt: AsyncClient,
}

impl MqttActuator {
    pub fn new(mqtt: AsyncClient) -> Self {
        Self { mqtt }
    }

    async fn publish(&self, payload: &'static str) -> Result<(), ActuatorError> {
        debug!("actuator command {payload}");
        self.mqtt
            .publish(TOPIC_ACTUATOR_CMD, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|err| ActuatorError::new(format!("publish {payload} failed: {err}")))
    }
}

#[async_trait]
impl Actuator for MqttActuator {
    async fn turn_on(&self) -> Result<(), ActuatorError> {
        self.publish("ON").await
    }

    async fn turn_off(&self) -> Result<(), ActuatorError> {
        self.publish("OFF").await
    }
}
