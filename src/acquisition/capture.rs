//! capture.rs
//! Trigger-synchronized capture: the single writer of the session's sample log.
//!
//! One capture = establish the session clock (first capture only) → read every channel →
//! evaluate the interlock → seal a row whose index is the current log length → append.
//! The whole sequence runs under one lock, so "read length, assign index, append" is
//! indivisible and two captures can never interleave row assembly.
//!
//! Sensor faults are kept in the row as quality tags; only hardware errors abort a capture
//! (no row is sealed and the counter does not move).

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, RecvTimeoutError};
use log::{debug, info};
use parking_lot::Mutex;
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::acquisition::{
    converter::Calibration,
    sensor::{ChannelId, Reading, SensorGateway, read_snapshot},
    trigger::TriggerEdge,
};
use crate::config::RigConfig;
use crate::error::AcqResult;
use crate::safety::interlock::Interlock;
use crate::utils::metrics::SharedMetrics;

/// How often an idle worker re-checks the running flag.
const WORKER_POLL: Duration = Duration::from_millis(20);
/// Longest uninterrupted sleep between free-running rows, so an abort is noticed promptly.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    pub index: u64,
    pub elapsed_time: Duration,
    pub temperatures: Vec<Reading>,
    pub pressures: Vec<Reading>,
}

/// Append-only sequence of rows where `rows[i].index == i`.
///
/// The only way in is [`SampleLog::seal`], which assigns the index itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleLog {
    rows: Vec<SampleRow>,
}

impl SampleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[SampleRow] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SampleRow> {
        self.rows.iter()
    }

    pub fn next_index(&self) -> u64 {
        self.rows.len() as u64
    }

    /// Seals a new row at the end of the log and returns it.
    pub fn seal(
        &mut self,
        elapsed_time: Duration,
        temperatures: Vec<Reading>,
        pressures: Vec<Reading>,
    ) -> &SampleRow {
        let index = self.next_index();
        self.rows.push(SampleRow {
            index,
            elapsed_time,
            temperatures,
            pressures,
        });
        &self.rows[self.rows.len() - 1]
    }
}

impl<'a> IntoIterator for &'a SampleLog {
    type Item = &'a SampleRow;
    type IntoIter = std::slice::Iter<'a, SampleRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[derive(Default)]
struct SessionState {
    log: SampleLog,
    start_time: Option<Instant>,
}

pub struct CaptureLoop {
    session: Mutex<SessionState>,
    gateway: Arc<dyn SensorGateway>,
    interlock: Arc<Interlock>,
    metrics: SharedMetrics,
    temperature_channels: Vec<ChannelId>,
    pressure_channels: Vec<ChannelId>,
    calibration: Calibration,
}

impl CaptureLoop {
    pub fn new(
        config: &RigConfig,
        gateway: Arc<dyn SensorGateway>,
        interlock: Arc<Interlock>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            session: Mutex::new(SessionState::default()),
            gateway,
            interlock,
            metrics,
            temperature_channels: config.temperature_channels.clone(),
            pressure_channels: config.pressure_channels.clone(),
            calibration: config.calibration,
        }
    }

    /// Captures one row and returns its index.
    pub fn capture(&self) -> AcqResult<u64> {
        let mut session = self.session.lock();

        let now = Instant::now();
        let start = *session.start_time.get_or_insert(now);

        let snapshot = read_snapshot(
            self.gateway.as_ref(),
            &self.temperature_channels,
            &self.pressure_channels,
            &self.calibration,
        )?;

        self.interlock.evaluate_worst(&snapshot.pressures);
        self.metrics.record_row(&snapshot.temperatures, &snapshot.pressures);

        let row = session.log.seal(
            now.duration_since(start),
            snapshot.temperatures,
            snapshot.pressures,
        );
        Ok(row.index)
    }

    /// Rows captured so far in the current session.
    pub fn len(&self) -> usize {
        self.session.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start_time(&self) -> Option<Instant> {
        self.session.lock().start_time
    }

    pub fn temperature_channels(&self) -> &[ChannelId] {
        &self.temperature_channels
    }

    pub fn pressure_channels(&self) -> &[ChannelId] {
        &self.pressure_channels
    }

    /// Moves the log and session clock out, leaving an empty session behind.
    /// Callers must have stopped every capture source first.
    pub fn take_session(&self) -> (SampleLog, Option<Instant>) {
        let mut session = self.session.lock();
        let taken = std::mem::take(&mut *session);
        (taken.log, taken.start_time)
    }

    /// Triggered mode: one capture per queued edge until `running` drops.
    /// Edges already queued when `running` drops are still captured.
    pub fn run_triggered(&self, edges: Receiver<TriggerEdge>, running: &AtomicBool) -> AcqResult<()> {
        info!("[Capture] waiting for trigger edges");
        loop {
            match edges.recv_timeout(WORKER_POLL) {
                Ok(edge) => {
                    let index = self.capture()?;
                    debug!(
                        "[Capture] row {} sealed {}us after edge",
                        index,
                        edge.at.elapsed().as_micros()
                    );
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        while let Ok(_edge) = edges.try_recv() {
            self.capture()?;
        }
        info!("[Capture] stopped after {} row(s)", self.len());
        Ok(())
    }

    /// Free-running mode: `samples` rows, one every `period`, the first immediately.
    /// Returns early (without error) when `running` drops.
    pub fn run_free_running(&self, samples: u64, period: Duration, running: &AtomicBool) -> AcqResult<()> {
        info!(
            "[Capture] free-running: {} sample(s) every {:.3}s",
            samples,
            period.as_secs_f64()
        );
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut next_deadline = Instant::now();

        for i in 0..samples {
            if !sleep_until(&sleeper, next_deadline, running) {
                break;
            }
            if i > 0 && Instant::now() > next_deadline + period {
                self.metrics.record_deadline_miss();
            }

            self.capture()?;
            next_deadline += period;
        }
        info!("[Capture] free-running finished with {} row(s)", self.len());
        Ok(())
    }
}

/// Sleeps in short slices until `deadline`; false if `running` dropped meanwhile.
fn sleep_until(sleeper: &SpinSleeper, deadline: Instant, running: &AtomicBool) -> bool {
    loop {
        if !running.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        sleeper.sleep((deadline - now).min(MAX_SLEEP_SLICE));
    }
}
