use std::{
    collections::HashMap, io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use thermostat_core::{
    tracker::is_unavailable, ControlMode, RuntimeConfig, ThermostatError, ThermostatService,
    ThermostatStatus, TOPIC_ACTUATOR_STATE, TOPIC_CMD_MODE, TOPIC_CMD_PRESET, TOPIC_CMD_TARGET,
    TOPIC_CONTROLLER_STATE, TOPIC_SENSOR_MOTION, TOPIC_SENSOR_POWER, TOPIC_SENSOR_POWER_CEILING,
    TOPIC_SENSOR_TEMP, TOPIC_SENSOR_WINDOW,
};

use crate::actuator::MqttActuator;

#[derive(Clone)]
struct AppState {
    thermostat: ThermostatService<MqttActuator>,
    mqtt: AsyncClient,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StatePayload {
    #[serde(flatten)]
    status: ThermostatStatus,
    #[serde(rename = "updatedAt")]
    updated_at: String,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const STATE_PUBLISH_PERIOD: Duration = Duration::from_secs(10);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.mqtt.host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.mqtt.port);

    let mut mqtt_options = MqttOptions::new(runtime.mqtt.client_id.clone(), mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.mqtt.user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.mqtt.pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let mut config = runtime.thermostat;
    config.sanitize();
    let keep_alive = config.keep_alive_ms;
    let thermostat =
        ThermostatService::new(MqttActuator::new(mqtt.clone()), config, runtime.settings);

    let app_state = AppState {
        thermostat,
        mqtt,
        store,
    };

    subscribe_topics(&app_state.mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    if let Some(period_ms) = keep_alive {
        app_state
            .thermostat
            .spawn_keep_alive(Duration::from_millis(period_ms));
    }
    spawn_state_publish_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/target", post(handle_set_target))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/preset", post(handle_set_preset))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_SENSOR_TEMP,
        TOPIC_SENSOR_POWER,
        TOPIC_SENSOR_POWER_CEILING,
        TOPIC_SENSOR_WINDOW,
        TOPIC_SENSOR_MOTION,
        TOPIC_ACTUATOR_STATE,
        TOPIC_CMD_TARGET,
        TOPIC_CMD_MODE,
        TOPIC_CMD_PRESET,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce)
            .await
            .with_context(|| format!("failed to subscribe to {topic}"))?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, &message.topic, &message.payload).await
                    {
                        warn!("mqtt message on {} failed: {err:#}", message.topic);
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATE_PUBLISH_PERIOD);
        loop {
            interval.tick().await;

            let payload = StatePayload {
                status: app_state.thermostat.status().await,
                updated_at: Utc::now().to_rfc3339(),
            };

            match serde_json::to_vec(&payload) {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = std::str::from_utf8(payload).context("non utf8 mqtt payload")?;
    let thermostat = &app_state.thermostat;

    match topic {
        TOPIC_SENSOR_TEMP => thermostat.update_temperature(message).await?,
        TOPIC_SENSOR_POWER => thermostat.update_power(message).await?,
        TOPIC_SENSOR_POWER_CEILING => thermostat.update_power_ceiling(message).await?,
        TOPIC_SENSOR_WINDOW => {
            if let Some(open) = parse_binary_state(message) {
                thermostat.window_changed(open).await?;
            }
        }
        TOPIC_SENSOR_MOTION => {
            if let Some(detected) = parse_binary_state(message) {
                thermostat.motion_changed(detected).await?;
            }
        }
        TOPIC_ACTUATOR_STATE => {
            if let Some(on) = parse_binary_state(message) {
                thermostat.actuator_changed(on).await?;
            }
        }
        TOPIC_CMD_TARGET => {
            let target = message
                .trim()
                .parse::<f32>()
                .with_context(|| format!("invalid target {message:?}"))?;
            let result = thermostat.set_target_temperature(target).await;
            finish_command(app_state, result).await?;
        }
        TOPIC_CMD_MODE => {
            let mode = message.parse::<ControlMode>()?;
            let result = thermostat.set_mode(mode).await;
            finish_command(app_state, result).await?;
        }
        TOPIC_CMD_PRESET => {
            let result = thermostat.set_preset_by_name(message).await;
            finish_command(app_state, result).await?;
        }
        _ => {}
    }

    Ok(())
}

/// Persists settings after a command that was applied. An actuator failure
/// still leaves the new setting in place, so it is logged and persisted too.
async fn finish_command(
    app_state: &AppState,
    result: Result<(), ThermostatError>,
) -> anyhow::Result<()> {
    match result {
        Ok(()) => {}
        Err(err @ ThermostatError::ActuatorCommandFailed { .. }) => {
            warn!("command applied, {:#}", anyhow::Error::new(err));
        }
        Err(err) => return Err(err.into()),
    }
    persist_runtime_from_state(app_state).await
}

/// Maps the payloads sensors and relays publish for two-state entities.
fn parse_binary_state(message: &str) -> Option<bool> {
    if is_unavailable(message) {
        return None;
    }
    match message.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "open" | "detected" => Some(true),
        "off" | "false" | "0" | "closed" | "clear" => Some(false),
        other => {
            warn!("ignoring unrecognized binary state {other:?}");
            None
        }
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.thermostat.status().await)
}

async fn handle_set_target(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(target) = value.trim().parse::<f32>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };

    let result = state.thermostat.set_target_temperature(target).await;
    command_response(state, result).await
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let mode = match value.parse::<ControlMode>() {
        Ok(mode) => mode,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let result = state.thermostat.set_mode(mode).await;
    command_response(state, result).await
}

async fn handle_set_preset(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    let result = state.thermostat.set_preset_by_name(value).await;
    command_response(state, result).await
}

async fn command_response(
    state: AppState,
    result: Result<(), ThermostatError>,
) -> axum::response::Response {
    let actuator_failure = match result {
        Ok(()) => None,
        Err(err @ ThermostatError::ActuatorCommandFailed { .. }) => Some(err),
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    if let Err(err) = persist_runtime_from_state(&state).await {
        warn!("failed to persist runtime settings: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist runtime settings",
        );
    }

    if let Some(err) = actuator_failure {
        let message = format!("{:#}", anyhow::Error::new(err));
        warn!("{message}");
        return error_response(StatusCode::BAD_GATEWAY, &message);
    }

    handle_get_status(State(state)).await.into_response()
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("THERMOSTAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.thermostat"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
                .with_context(|| format!("invalid {}", self.runtime_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.runtime_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

async fn persist_runtime_from_state(state: &AppState) -> anyhow::Result<()> {
    let settings = state.thermostat.settings().await;

    let mut runtime = state.store.load_runtime_config().await?;
    runtime.settings = Some(settings);
    state.store.save_runtime_config(&runtime).await
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn binary_states_from_sensors_and_relays() {
        assert_eq!(parse_binary_state("ON"), Some(true));
        assert_eq!(parse_binary_state(" open "), Some(true));
        assert_eq!(parse_binary_state("detected"), Some(true));
        assert_eq!(parse_binary_state("off"), Some(false));
        assert_eq!(parse_binary_state("closed"), Some(false));
        assert_eq!(parse_binary_state("unavailable"), None);
        assert_eq!(parse_binary_state("maybe"), None);
    }

    #[test]
    fn state_payload_flattens_status() {
        let status = thermostat_core::ThermostatEngine::new(Default::default(), None).status(0);
        let payload = StatePayload {
            status,
            updated_at: "2024-01-01T00:00:00+00:00".to_string(),
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["mode"], "off");
        assert_eq!(json["targetTemp"], 7.0);
        assert_eq!(json["updatedAt"], "2024-01-01T00:00:00+00:00");
    }
}
