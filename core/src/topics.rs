pub const TOPIC_SENSOR_TEMP: &str = "thermostat/sensor/temperature";
pub const TOPIC_SENSOR_POWER: &str = "thermostat/sensor/power";
pub const TOPIC_SENSOR_POWER_CEILING: &str = "thermostat/sensor/power_ceiling";
pub const TOPIC_SENSOR_WINDOW: &str = "thermostat/sensor/window";
pub const TOPIC_SENSOR_MOTION: &str = "thermostat/sensor/motion";

pub const TOPIC_ACTUATOR_STATE: &str = "thermostat/actuator/state";
pub const TOPIC_ACTUATOR_CMD: &str = "thermostat/cmnd/actuator/power";

pub const TOPIC_CONTROLLER_STATE: &str = "thermostat/controller/state";

pub const TOPIC_CMD_TARGET: &str = "thermostat/cmnd/thermostat/target";
pub const TOPIC_CMD_MODE: &str = "thermostat/cmnd/thermostat/mode";
pub const TOPIC_CMD_PRESET: &str = "thermostat/cmnd/thermostat/preset";
