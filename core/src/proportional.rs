use crate::{
    config::ProportionalConfig,
    types::{CyclePhase, ResponseCurve},
};

/// Shortest on period worth switching the actuator for.
pub const MIN_ON_DURATION_SEC: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DutyCycle {
    /// Raw fraction, capped at 1. May be negative when the zone is above target.
    pub on_fraction: f32,
    pub on_duration_sec: f32,
    pub off_duration_sec: f32,
}

impl DutyCycle {
    pub fn calculate(error: f32, config: &ProportionalConfig, power_exceeded: bool) -> Self {
        let cycle_sec = config.cycle_length_sec();

        let on_fraction = if power_exceeded {
            0.0
        } else {
            match config.curve {
                ResponseCurve::Linear => 0.25 * error + config.bias,
                ResponseCurve::Atan => (error + config.bias).atan() / 1.4,
            }
        }
        .min(1.0);

        let mut on_duration_sec = on_fraction.max(0.0) * cycle_sec;
        if on_duration_sec < MIN_ON_DURATION_SEC {
            on_duration_sec = 0.0;
        }

        Self {
            on_fraction,
            on_duration_sec,
            off_duration_sec: cycle_sec - on_duration_sec,
        }
    }
}

/// Outcome of one `advance` call; the caller turns it into actuator commands
/// and timer arming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTransition {
    /// Thermostat stopped: actuator must go off, no timer.
    Halted,
    /// Nothing to heat for; phase stays `None` without a timer.
    Idle { turn_off: bool },
    EnteredOn { until_ms: u64 },
    EnteredOff { until_ms: u64 },
    /// Current phase has not ended yet.
    Waiting { until_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct ProportionalCycle {
    phase: CyclePhase,
    phase_end_at_ms: Option<u64>,
    duty: Option<DutyCycle>,
}

impl Default for ProportionalCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ProportionalCycle {
    pub fn new() -> Self {
        Self {
            phase: CyclePhase::None,
            phase_end_at_ms: None,
            duty: None,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn phase_end_at_ms(&self) -> Option<u64> {
        self.phase_end_at_ms
    }

    pub fn duty(&self) -> Option<DutyCycle> {
        self.duty
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.phase_end_at_ms
            .map(|end| end.saturating_sub(now_ms))
            .unwrap_or(0)
    }

    /// Drops back to `None`. Returns true if a phase timer was pending.
    pub fn reset(&mut self) -> bool {
        let was_running = self.phase != CyclePhase::None;
        self.phase = CyclePhase::None;
        self.phase_end_at_ms = None;
        was_running
    }

    /// Runs one step of the cycle. `recompute` is only called at phase
    /// boundaries so the cycle length stays stable mid-phase.
    pub fn advance(
        &mut self,
        now_ms: u64,
        running: bool,
        actuator_on: bool,
        recompute: impl FnOnce() -> DutyCycle,
    ) -> CycleTransition {
        if !running {
            self.reset();
            return CycleTransition::Halted;
        }

        match (self.phase, self.phase_end_at_ms) {
            (CyclePhase::None, _) => {
                let duty = recompute();
                self.duty = Some(duty);
                if duty.on_duration_sec > 0.0 {
                    self.enter_on(now_ms, duty)
                } else {
                    CycleTransition::Idle {
                        turn_off: actuator_on,
                    }
                }
            }
            (CyclePhase::On, Some(end)) if now_ms >= end => {
                let off_sec = self.duty.map(|duty| duty.off_duration_sec).unwrap_or(0.0);
                self.enter_off(now_ms, off_sec)
            }
            (CyclePhase::Off, Some(end)) if now_ms >= end => {
                let duty = recompute();
                self.duty = Some(duty);
                if duty.on_duration_sec > 0.0 {
                    self.enter_on(now_ms, duty)
                } else {
                    self.enter_off(now_ms, duty.off_duration_sec)
                }
            }
            (_, end) => CycleTransition::Waiting {
                until_ms: end.unwrap_or(now_ms),
            },
        }
    }

    fn enter_on(&mut self, now_ms: u64, duty: DutyCycle) -> CycleTransition {
        let until_ms = now_ms.saturating_add(secs_to_ms(duty.on_duration_sec));
        self.phase = CyclePhase::On;
        self.phase_end_at_ms = Some(until_ms);
        CycleTransition::EnteredOn { until_ms }
    }

    fn enter_off(&mut self, now_ms: u64, off_sec: f32) -> CycleTransition {
        let until_ms = now_ms.saturating_add(secs_to_ms(off_sec));
        self.phase = CyclePhase::Off;
        self.phase_end_at_ms = Some(until_ms);
        CycleTransition::EnteredOff { until_ms }
    }
}

fn secs_to_ms(secs: f32) -> u64 {
    (secs.max(0.0) * 1_000.0).round() as u64
}
