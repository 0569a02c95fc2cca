//! session.rs
//! Acquisition session: wires gateway, interlock, edge source, capture worker and monitor together.
//!
//! Start: validate config -> configure channels -> spawn capture worker (max priority, optional core pin)
//! -> spawn monitor -> arm the edge source.
//!
//! Stop (operator abort, free-running completion, or fatal error):
//! 1. stop accepting edges and disarm the source
//! 2. join the capture worker (queued edges are drained and sealed first)
//! 3. join the monitor
//! 4. take the log and persist it (one retry)
//! 5. release both safety outputs
//!
//! A hardware error in either thread releases the outputs immediately, stops the session and is
//! reported once. Rows captured before the error are still persisted.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::Receiver;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::acquisition::{
    capture::CaptureLoop,
    sensor::{SensorGateway, configure_all},
    trigger::{EdgeSource, TriggerEdge, trigger_gate},
};
use crate::config::{AcquisitionMode, RigConfig};
use crate::error::{AcqError, AcqResult};
use crate::safety::{
    interlock::{Interlock, InterlockState, SafetyActuator},
    monitor::{LiveMonitor, StatusDisplay},
};
use crate::utils::{
    export::{PersistFailure, PersistReport, SessionHeader, persist_with_retry},
    metrics::{CaptureMetrics, MetricsSnapshot, SharedMetrics},
};

/// State touched by both worker threads.
struct SessionShared {
    interlock: Arc<Interlock>,
    accepting: Arc<AtomicBool>,
    running: AtomicBool,
    worker_done: AtomicBool,
    fatal: Mutex<Option<AcqError>>,
}

impl SessionShared {
    fn fail(&self, source: &str, e: AcqError) {
        self.accepting.store(false, Ordering::Release);
        self.running.store(false, Ordering::Release);
        self.interlock.release();

        let mut slot = self.fatal.lock();
        if slot.is_none() {
            error!("[Session] {} failed: {}; safety outputs released", source, e);
            *slot = Some(e);
        } else {
            debug!("[Session] further {} error after fatal: {}", source, e);
        }
    }

    fn has_failed(&self) -> bool {
        self.fatal.lock().is_some()
    }
}

/// What a stopped session hands back to the operator.
#[derive(Debug)]
pub struct SessionOutcome {
    pub persisted: Result<PersistReport, PersistFailure>,
    /// First session-fatal error, if the session ended on one.
    pub fatal: Option<AcqError>,
    pub metrics: MetricsSnapshot,
    pub final_interlock: InterlockState,
}

impl SessionOutcome {
    pub fn is_clean(&self) -> bool {
        self.fatal.is_none() && self.persisted.is_ok()
    }
}

pub struct AcquisitionSession {
    config: RigConfig,
    capture: Arc<CaptureLoop>,
    metrics: SharedMetrics,
    shared: Arc<SessionShared>,
    edge_source: Option<Box<dyn EdgeSource>>,
    worker: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
    released: bool,
}

impl AcquisitionSession {
    /// Validates `config`, configures every channel and starts acquiring.
    /// Triggered mode requires an edge source. On error nothing is left running and outputs are off.
    pub fn start(
        config: RigConfig,
        gateway: Arc<dyn SensorGateway>,
        actuator: Arc<dyn SafetyActuator>,
        edge_source: Option<Box<dyn EdgeSource>>,
        display: Box<dyn StatusDisplay>,
    ) -> AcqResult<Self> {
        config.validate()?;
        if config.mode == AcquisitionMode::Triggered && edge_source.is_none() {
            return Err(AcqError::configuration(
                "mode",
                "triggered acquisition needs an edge source",
            ));
        }
        configure_all(
            gateway.as_ref(),
            &config.temperature_channels,
            &config.pressure_channels,
            config.thermocouple_type,
        )?;

        let interlock = Arc::new(Interlock::new(config.pressure_threshold, actuator));
        let metrics: SharedMetrics = Arc::new(CaptureMetrics::new());
        let capture = Arc::new(CaptureLoop::new(
            &config,
            gateway.clone(),
            interlock.clone(),
            metrics.clone(),
        ));
        let monitor = LiveMonitor::new(&config, gateway, interlock.clone(), metrics.clone());

        info!(
            "[Session] starting {} acquisition at {} Hz: T{:?} P{:?}, threshold {} bar",
            config.mode.name(),
            config.acquisition_frequency_hz,
            config.temperature_channels,
            config.pressure_channels,
            config.pressure_threshold
        );

        let mut session = Self {
            config,
            capture,
            metrics,
            shared: Arc::new(SessionShared {
                interlock,
                accepting: Arc::new(AtomicBool::new(true)),
                running: AtomicBool::new(true),
                worker_done: AtomicBool::new(false),
                fatal: Mutex::new(None),
            }),
            edge_source,
            worker: None,
            monitor: None,
            released: false,
        };

        if let Err(e) = session.launch(monitor, display) {
            session.shutdown_threads();
            session.release();
            return Err(e);
        }
        Ok(session)
    }

    fn launch(&mut self, monitor: LiveMonitor, display: Box<dyn StatusDisplay>) -> AcqResult<()> {
        let (handler, edges) = trigger_gate(self.shared.accepting.clone(), self.metrics.clone());

        self.worker = Some(self.spawn_worker(edges)?);
        self.monitor = Some(self.spawn_monitor(monitor, display)?);

        if self.config.mode == AcquisitionMode::Triggered {
            if let Some(source) = self.edge_source.as_mut() {
                source.on_rising_edge(handler)?;
            }
        }
        Ok(())
    }

    fn spawn_worker(&self, edges: Receiver<TriggerEdge>) -> AcqResult<JoinHandle<()>> {
        let capture = self.capture.clone();
        let shared = self.shared.clone();
        let mode = self.config.mode;
        let samples = self.config.sample_count;
        let period = match mode {
            AcquisitionMode::FreeRunning => self.config.sample_period()?,
            AcquisitionMode::Triggered => Duration::ZERO,
        };
        let core = self.config.capture_core;

        let handle = thread::Builder::new()
            .name("capture".into())
            .spawn_with_priority(ThreadPriority::Max, move |priority| {
                if let Err(e) = priority {
                    warn!("[Capture] could not raise thread priority: {:?}", e);
                }
                if let Some(core) = core {
                    pin_to_core(core);
                }

                let result = match mode {
                    AcquisitionMode::Triggered => capture.run_triggered(edges, &shared.running),
                    AcquisitionMode::FreeRunning => {
                        capture.run_free_running(samples, period, &shared.running)
                    }
                };
                if let Err(e) = result {
                    shared.fail("capture", e);
                }
                shared.worker_done.store(true, Ordering::Release);
            })?;
        Ok(handle)
    }

    fn spawn_monitor(
        &self,
        monitor: LiveMonitor,
        mut display: Box<dyn StatusDisplay>,
    ) -> AcqResult<JoinHandle<()>> {
        let shared = self.shared.clone();
        let handle = thread::Builder::new().name("monitor".into()).spawn(move || {
            if let Err(e) = monitor.run(display.as_mut(), &shared.running) {
                shared.fail("monitor", e);
            }
        })?;
        Ok(handle)
    }

    /// True once the capture worker has exited: free-running target reached, or a fatal error.
    pub fn is_finished(&self) -> bool {
        self.shared.worker_done.load(Ordering::Acquire) || self.shared.has_failed()
    }

    pub fn sample_count(&self) -> u64 {
        self.metrics.rows_captured()
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn interlock(&self) -> &Arc<Interlock> {
        &self.shared.interlock
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    /// Orderly shutdown: no edge is accepted after this call, in-flight and queued captures are
    /// sealed, the log is persisted once, and only then are the safety outputs released.
    pub fn stop(mut self) -> SessionOutcome {
        info!("[Session] stopping after {} row(s)", self.sample_count());
        self.shutdown_threads();

        let (log, _started) = self.capture.take_session();
        let requested = match self.config.mode {
            AcquisitionMode::FreeRunning => self.config.sample_count,
            AcquisitionMode::Triggered => log.len() as u64,
        };
        let header = SessionHeader::new(
            requested,
            self.config.acquisition_frequency_hz,
            &self.config.temperature_channels,
            &self.config.pressure_channels,
        );
        let persisted = persist_with_retry(log, header, &self.config.output_path);

        self.release();
        self.metrics.log_summary();

        SessionOutcome {
            persisted,
            fatal: self.shared.fatal.lock().take(),
            metrics: self.metrics.snapshot(),
            final_interlock: self.shared.interlock.state(),
        }
    }

    fn shutdown_threads(&mut self) {
        self.shared.accepting.store(false, Ordering::Release);
        if let Some(source) = self.edge_source.as_mut() {
            source.disarm();
        }
        self.shared.running.store(false, Ordering::Release);

        if let Some(h) = self.worker.take() {
            if h.join().is_err() {
                error!("[Session] capture worker panicked");
            }
        }
        if let Some(h) = self.monitor.take() {
            if h.join().is_err() {
                error!("[Session] monitor panicked");
            }
        }
    }

    fn release(&mut self) {
        self.shared.interlock.release();
        self.released = true;
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        if !self.released {
            warn!("[Session] dropped without stop(); releasing outputs, log discarded");
            self.shutdown_threads();
            self.release();
        }
    }
}

fn pin_to_core(core: usize) {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.get(core) {
        Some(id) if core_affinity::set_for_current(*id) => {
            info!("[Capture] pinned to core {}", core)
        }
        Some(_) => warn!("[Capture] failed to pin to core {}", core),
        None => warn!("[Capture] core {} not available", core),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{sensor::ScriptedGateway, trigger::ManualEdgeSource};
    use crate::safety::monitor::{DisplayError, DisplaySnapshot};
    use crate::safety::interlock::SimulatedOutputs;
    use std::time::Instant;

    struct NullDisplay;

    impl StatusDisplay for NullDisplay {
        fn render(&mut self, _: &DisplaySnapshot) -> Result<(), DisplayError> {
            Ok(())
        }
    }

    fn config(dir: &tempfile::TempDir, mode: AcquisitionMode) -> RigConfig {
        RigConfig {
            mode,
            sample_count: 3,
            acquisition_frequency_hz: 1.0,
            temperature_channels: vec![],
            monitor_interval_ms: 5,
            output_path: dir.path().join("run.csv"),
            ..RigConfig::default()
        }
    }

    fn wait_for(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn triggered_without_edge_source_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = Arc::new(SimulatedOutputs::new());
        let err = AcquisitionSession::start(
            config(&dir, AcquisitionMode::Triggered),
            Arc::new(ScriptedGateway::new()),
            outputs,
            None,
            Box::new(NullDisplay),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AcqError::Configuration { param: "mode", .. }));
    }

    #[test]
    fn triggered_session_captures_each_edge() {
        let dir = tempfile::tempdir().unwrap();
        let source = ManualEdgeSource::new();
        let line = source.line();
        let outputs = Arc::new(SimulatedOutputs::new());

        let session = AcquisitionSession::start(
            config(&dir, AcquisitionMode::Triggered),
            Arc::new(ScriptedGateway::new()),
            outputs.clone(),
            Some(Box::new(source)),
            Box::new(NullDisplay),
        )
        .unwrap();

        for expected in 1..=3 {
            assert!(line.fire());
            wait_for(|| session.sample_count() >= expected);
        }
        let outcome = session.stop();
        assert!(outcome.is_clean());
        assert_eq!(outcome.persisted.unwrap().rows, 3);
        assert!(!line.fire());
        assert!(!outputs.alarm() && !outputs.shutdown());
    }

    #[test]
    fn free_running_session_finishes_on_its_own() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir, AcquisitionMode::FreeRunning);
        cfg.acquisition_frequency_hz = 200.0;

        let session = AcquisitionSession::start(
            cfg,
            Arc::new(ScriptedGateway::new()),
            Arc::new(SimulatedOutputs::new()),
            None,
            Box::new(NullDisplay),
        )
        .unwrap();
        wait_for(|| session.is_finished());
        assert!(session.is_finished());

        let outcome = session.stop();
        assert_eq!(outcome.metrics.rows_captured, 3);
        assert_eq!(outcome.persisted.unwrap().rows, 3);
    }
}
