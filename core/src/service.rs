use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    sync::{Mutex, MutexGuard},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, warn};

use crate::{
    config::{PersistedSettings, ThermostatConfig, MAX_PERIOD_MS},
    error::{ActuatorError, ThermostatError},
    preset::Preset,
    thermostat::{EngineAction, ThermostatEngine},
    types::{ControlMode, ControlTrigger, ThermostatStatus},
};

/// Switchable device driven by the thermostat: a heater relay, or a cooler
/// when the thermostat runs in AC mode.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn turn_on(&self) -> Result<(), ActuatorError>;
    async fn turn_off(&self) -> Result<(), ActuatorError>;
}

#[derive(Debug, Clone, Copy)]
enum TimerKind {
    Cycle,
    Motion,
}

struct ControlState {
    engine: ThermostatEngine,
    // Bumped on every arm/cancel; a firing timer with an older value is stale.
    cycle_timer: u64,
    motion_timer: u64,
}

struct Inner<A> {
    actuator: A,
    state: Mutex<ControlState>,
    started: Instant,
}

/// Runs a [`ThermostatEngine`] against a real actuator. All entry points
/// share one lock, so control passes, timer firings and commands never
/// interleave.
pub struct ThermostatService<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for ThermostatService<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Actuator + 'static> ThermostatService<A> {
    pub fn new(
        actuator: A,
        config: ThermostatConfig,
        persisted: Option<PersistedSettings>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                actuator,
                state: Mutex::new(ControlState {
                    engine: ThermostatEngine::new(config, persisted),
                    cycle_timer: 0,
                    motion_timer: 0,
                }),
                started: Instant::now(),
            }),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.inner
            .started
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    pub async fn control(&self, trigger: ControlTrigger) -> Result<(), ThermostatError> {
        let mut state = self.inner.state.lock().await;
        let actions = state.engine.control(trigger, self.now_ms());
        self.execute(&mut state, actions).await
    }

    pub async fn update_temperature(&self, raw: &str) -> Result<(), ThermostatError> {
        let mut state = self.inner.state.lock().await;
        let actions = state.engine.update_temperature(raw, self.now_ms())?;
        self.execute(&mut state, actions).await
    }

    pub async fn update_power(&self, raw: &str) -> Result<(), ThermostatError> {
        self.inner.state.lock().await.engine.update_power(raw)
    }

    pub async fn update_power_ceiling(&self, raw: &str) -> Result<(), ThermostatError> {
        self.inner.state.lock().await.engine.update_power_ceiling(raw)
    }

    pub async fn actuator_changed(&self, on: bool) -> Result<(), ThermostatError> {
        let mut state = self.inner.state.lock().await;
        let actions = state.engine.observe_actuator(on, self.now_ms());
        self.execute(&mut state, actions).await
    }

    pub async fn window_changed(&self, open: bool) -> Result<(), ThermostatError> {
        let mut state = self.inner.state.lock().await;
        let actions = state.engine.window_changed(open, self.now_ms())?;
        self.execute(&mut state, actions).await
    }

    pub async fn motion_changed(&self, detected: bool) -> Result<(), ThermostatError> {
        let mut state = self.inner.state.lock().await;
        let actions = state.engine.motion_changed(detected, self.now_ms());
        self.execute(&mut state, actions).await
    }

    pub async fn set_target_temperature(&self, temp: f32) -> Result<(), ThermostatError> {
        let mut state = self.inner.state.lock().await;
        let actions = state.engine.set_target_temp(temp, self.now_ms())?;
        self.execute(&mut state, actions).await
    }

    pub async fn set_mode(&self, mode: ControlMode) -> Result<(), ThermostatError> {
        let mut state = self.inner.state.lock().await;
        let actions = state.engine.set_mode(mode, self.now_ms())?;
        self.execute(&mut state, actions).await
    }

    pub async fn set_preset(&self, preset: Preset) -> Result<(), ThermostatError> {
        let mut state = self.inner.state.lock().await;
        let actions = state.engine.set_preset(preset, self.now_ms())?;
        self.execute(&mut state, actions).await
    }

    pub async fn set_preset_by_name(&self, name: &str) -> Result<(), ThermostatError> {
        let mut state = self.inner.state.lock().await;
        let preset = state.engine.parse_preset(name)?;
        let actions = state.engine.set_preset(preset, self.now_ms())?;
        self.execute(&mut state, actions).await
    }

    pub async fn status(&self) -> ThermostatStatus {
        self.inner.state.lock().await.engine.status(self.now_ms())
    }

    pub async fn settings(&self) -> PersistedSettings {
        self.inner.state.lock().await.engine.settings()
    }

    /// Re-affirms the actuator state every `period`, starting one period from
    /// now.
    pub fn spawn_keep_alive(&self, period: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let period = period.clamp(
                Duration::from_millis(1),
                Duration::from_millis(MAX_PERIOD_MS),
            );
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                if let Err(err) = service.control(ControlTrigger::KeepAlive).await {
                    warn!("keep-alive control failed: {err:#}");
                }
            }
        })
    }

    /// Carries out engine actions in order. A failed command is logged and
    /// the remaining actions still run; the first failure is returned.
    async fn execute(
        &self,
        state: &mut MutexGuard<'_, ControlState>,
        actions: Vec<EngineAction>,
    ) -> Result<(), ThermostatError> {
        let mut first_error = None;

        for action in actions {
            match action {
                EngineAction::TurnOn | EngineAction::TurnOff => {
                    let on = action == EngineAction::TurnOn;
                    let (command, result) = if on {
                        ("on", self.inner.actuator.turn_on().await)
                    } else {
                        ("off", self.inner.actuator.turn_off().await)
                    };

                    match result {
                        Ok(()) => state.engine.record_actuator(on, self.now_ms()),
                        Err(source) => {
                            warn!("{} - actuator {command} failed: {source}", state.engine.name());
                            first_error.get_or_insert(ThermostatError::ActuatorCommandFailed {
                                command,
                                source,
                            });
                        }
                    }
                }
                EngineAction::ArmCycleTimer { at_ms } => {
                    state.cycle_timer += 1;
                    self.arm(TimerKind::Cycle, state.cycle_timer, at_ms);
                }
                EngineAction::CancelCycleTimer => {
                    state.cycle_timer += 1;
                }
                EngineAction::ArmMotionTimer { at_ms } => {
                    state.motion_timer += 1;
                    self.arm(TimerKind::Motion, state.motion_timer, at_ms);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn arm(&self, kind: TimerKind, generation: u64, at_ms: u64) {
        let Some(deadline) = self.inner.started.checked_add(Duration::from_millis(at_ms)) else {
            warn!("{:?} timer at {at_ms} ms is out of range, not armed", kind);
            return;
        };
        tokio::spawn(self.clone().timer_fired(kind, generation, deadline));
    }

    // Boxed so the spawn inside `arm` does not depend on this future's own type.
    fn timer_fired(
        self,
        kind: TimerKind,
        generation: u64,
        deadline: Instant,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            tokio::time::sleep_until(deadline).await;

            let mut state = self.inner.state.lock().await;
            let current = match kind {
                TimerKind::Cycle => state.cycle_timer,
                TimerKind::Motion => state.motion_timer,
            };
            if current != generation {
                debug!("{:?} timer superseded", kind);
                return;
            }

            let now_ms = self.now_ms();
            let actions = match kind {
                TimerKind::Cycle => state.engine.cycle_timer_elapsed(now_ms),
                TimerKind::Motion => state.engine.motion_delay_elapsed(now_ms),
            };
            if let Err(err) = self.execute(&mut state, actions).await {
                warn!("{:?} timer handling failed: {err:#}", kind);
            }
        })
    }
}
