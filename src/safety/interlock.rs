//! interlock.rs
//! Pressure interlock: SAFE ⇄ ALARM, driving the audible alarm and the shutdown actuator together.
//!
//! - Trip condition: pressure > threshold; a reading equal to the threshold stays SAFE
//! - Non-finite pressures and fault-tagged readings trip the interlock (fail toward shutdown)
//! - No hysteresis, no latching: the next reading at or below threshold returns to SAFE
//! - `release()` is final: outputs go off and every later evaluation is ignored
//!
//! Concurrency: the capture worker and the monitor loop both call `evaluate`. Each evaluation
//! computes the new state and writes both outputs while holding one lock, so readers of
//! `state()` never see a mismatched pair. Concurrent evaluations are serialized by that lock;
//! the outputs reflect whichever evaluation *completed* last, which is not necessarily the one
//! that was *called* last. This is best-effort ordering, not strict real-time ordering.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::acquisition::sensor::Reading;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    Safe,
    Alarm,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterlockState {
    pub alarm_active: bool,
    pub shutdown_active: bool,
    pub threshold: f64,
}

impl InterlockState {
    fn safe(threshold: f64) -> Self {
        Self {
            alarm_active: false,
            shutdown_active: false,
            threshold,
        }
    }

    pub fn state(&self) -> AlarmState {
        if self.alarm_active {
            AlarmState::Alarm
        } else {
            AlarmState::Safe
        }
    }
}

/// Hardware outputs driven by the interlock.
pub trait SafetyActuator: Send + Sync {
    fn set_alarm(&self, on: bool);
    fn set_shutdown(&self, on: bool);
}

struct Guarded {
    current: InterlockState,
    released: bool,
}

pub struct Interlock {
    state: Mutex<Guarded>,
    actuator: Arc<dyn SafetyActuator>,
    evaluations: AtomicU64,
    trips: AtomicU64,
}

impl Interlock {
    /// Starts in SAFE and drives both outputs off so the hardware matches.
    pub fn new(threshold: f64, actuator: Arc<dyn SafetyActuator>) -> Self {
        actuator.set_alarm(false);
        actuator.set_shutdown(false);
        Self {
            state: Mutex::new(Guarded {
                current: InterlockState::safe(threshold),
                released: false,
            }),
            actuator,
            evaluations: AtomicU64::new(0),
            trips: AtomicU64::new(0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.state.lock().current.threshold
    }

    pub fn state(&self) -> InterlockState {
        self.state.lock().current
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Number of SAFE → ALARM transitions since construction.
    pub fn trips(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }

    /// Evaluates one pressure value (bar). Never fails. A no-op once released.
    pub fn evaluate(&self, pressure: f64) -> InterlockState {
        let mut guarded = self.state.lock();
        if guarded.released {
            debug!("[Interlock] released, ignoring {} bar", pressure);
            return guarded.current;
        }
        let state = &mut guarded.current;
        let trip = !pressure.is_finite() || pressure > state.threshold;

        if trip != state.alarm_active {
            self.drive(trip);
            state.alarm_active = trip;
            state.shutdown_active = trip;

            if trip {
                self.trips.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "[Interlock] ALARM: pressure {} bar > threshold {} bar; shutdown engaged",
                    pressure, state.threshold
                );
            } else {
                info!(
                    "[Interlock] SAFE: pressure {:.2} bar <= threshold {} bar; shutdown released",
                    pressure, state.threshold
                );
            }
        }

        self.evaluations.fetch_add(1, Ordering::Relaxed);
        *state
    }

    /// Fault-tagged readings carry no usable pressure and are evaluated as a trip.
    pub fn evaluate_reading(&self, reading: &Reading) -> InterlockState {
        self.evaluate(reading.value().unwrap_or(f64::NAN))
    }

    /// Evaluates the worst reading of a snapshot as a single evaluation.
    /// Returns `None` (and leaves the state untouched) when there are no readings.
    pub fn evaluate_worst(&self, readings: &[Reading]) -> Option<InterlockState> {
        let worst = readings
            .iter()
            .map(|r| r.value().filter(|v| v.is_finite()).unwrap_or(f64::NAN))
            .reduce(|a, b| if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) })?;
        Some(self.evaluate(worst))
    }

    /// Forces both outputs off, returns to SAFE and ignores every later evaluation.
    /// Used on session teardown and on fatal errors.
    pub fn release(&self) {
        let mut guarded = self.state.lock();
        self.drive(false);
        if guarded.current.alarm_active {
            info!("[Interlock] outputs released (was ALARM)");
        }
        guarded.current.alarm_active = false;
        guarded.current.shutdown_active = false;
        guarded.released = true;
    }

    fn drive(&self, on: bool) {
        // shutdown before alarm when tripping, alarm before shutdown when clearing
        if on {
            self.actuator.set_shutdown(true);
            self.actuator.set_alarm(true);
        } else {
            self.actuator.set_alarm(false);
            self.actuator.set_shutdown(false);
        }
    }
}

/// In-memory safety outputs: logs every change and keeps the last written pin levels.
#[derive(Default)]
pub struct SimulatedOutputs {
    alarm: AtomicBool,
    shutdown: AtomicBool,
    writes: AtomicU64,
}

impl SimulatedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alarm(&self) -> bool {
        self.alarm.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl SafetyActuator for SimulatedOutputs {
    fn set_alarm(&self, on: bool) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if self.alarm.swap(on, Ordering::AcqRel) != on {
            info!("[Outputs] buzzer {}", if on { "ON" } else { "off" });
        }
    }

    fn set_shutdown(&self, on: bool) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if self.shutdown.swap(on, Ordering::AcqRel) != on {
            info!("[Outputs] shutdown relay {}", if on { "ENGAGED" } else { "released" });
        }
    }
}
