//! trigger.rs
//! Edge event sources and the overrun policy between the edge handler and the capture worker.
//!
//! Overrun policy: queue-of-one, then drop-and-count.
//! - The handler never captures itself; it only enqueues a `TriggerEdge` with `try_send`
//! - Capacity 1: an edge arriving mid-capture waits; a second one in the same window is
//!   dropped and counted as a missed trigger
//! - The handler is non-blocking and safe to invoke concurrently or reentrantly

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, TrySendError, bounded};
use log::{debug, info};
use parking_lot::Mutex;
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::error::{AcqError, AcqResult};
use crate::utils::metrics::SharedMetrics;

/// Pending edges allowed while a capture is in flight.
pub const PENDING_TRIGGER_CAPACITY: usize = 1;

#[derive(Debug, Clone, Copy)]
pub struct TriggerEdge {
    pub at: Instant,
}

pub type EdgeHandler = Arc<dyn Fn() + Send + Sync>;

/// Hardware edge detection, abstracted. The source invokes the handler once per rising edge.
pub trait EdgeSource: Send {
    fn on_rising_edge(&mut self, handler: EdgeHandler) -> AcqResult<()>;

    /// Stops delivering edges and drops the handler. Idempotent.
    fn disarm(&mut self);
}

/// Builds the edge handler and the worker-side receiver.
/// Edges are ignored once `accepting` is cleared.
pub fn trigger_gate(
    accepting: Arc<AtomicBool>,
    metrics: SharedMetrics,
) -> (EdgeHandler, Receiver<TriggerEdge>) {
    let (tx, rx) = bounded::<TriggerEdge>(PENDING_TRIGGER_CAPACITY);

    let handler: EdgeHandler = Arc::new(move || {
        if !accepting.load(Ordering::Acquire) {
            return;
        }
        metrics.record_trigger();

        match tx.try_send(TriggerEdge { at: Instant::now() }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let missed = metrics.record_missed_trigger();
                debug!("[Trigger] capture busy, edge dropped (missed={})", missed);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("[Trigger] capture worker gone, edge ignored");
            }
        }
    });

    (handler, rx)
}

/// Periodic edge generator standing in for the external sync box.
pub struct PeriodicEdgeSource {
    period: Duration,
    armed: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicEdgeSource {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            armed: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl EdgeSource for PeriodicEdgeSource {
    fn on_rising_edge(&mut self, handler: EdgeHandler) -> AcqResult<()> {
        if self.handle.is_some() {
            return Err(AcqError::EdgeSource("handler already registered".into()));
        }
        if self.period.is_zero() {
            return Err(AcqError::EdgeSource("trigger period must be non-zero".into()));
        }

        self.armed.store(true, Ordering::Release);
        let armed = self.armed.clone();
        let period = self.period;

        let handle = thread::Builder::new()
            .name("edge-source".into())
            .spawn(move || {
                let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
                let mut next_edge = Instant::now() + period;
                while armed.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if now < next_edge {
                        sleeper.sleep((next_edge - now).min(Duration::from_millis(50)));
                        continue;
                    }
                    handler();
                    next_edge += period;
                }
            })?;

        info!("[Trigger] periodic edge source armed ({} ms)", period.as_millis());
        self.handle = Some(handle);
        Ok(())
    }

    fn disarm(&mut self) {
        self.armed.store(false, Ordering::Release);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
            info!("[Trigger] periodic edge source disarmed");
        }
    }
}

impl Drop for PeriodicEdgeSource {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Edge source fired by hand, from any thread. Used by tests and benches.
#[derive(Default)]
pub struct ManualEdgeSource {
    handler: Arc<Mutex<Option<EdgeHandler>>>,
}

/// Cloneable handle that fires edges into a `ManualEdgeSource`.
#[derive(Clone)]
pub struct EdgeLine {
    handler: Arc<Mutex<Option<EdgeHandler>>>,
}

impl EdgeLine {
    /// Delivers one rising edge. Returns false if no handler is registered.
    pub fn fire(&self) -> bool {
        // clone out so the handler runs without holding the registration lock
        let handler = self.handler.lock().clone();
        match handler {
            Some(h) => {
                h();
                true
            }
            None => false,
        }
    }
}

impl ManualEdgeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&self) -> EdgeLine {
        EdgeLine {
            handler: self.handler.clone(),
        }
    }
}

impl EdgeSource for ManualEdgeSource {
    fn on_rising_edge(&mut self, handler: EdgeHandler) -> AcqResult<()> {
        let mut slot = self.handler.lock();
        if slot.is_some() {
            return Err(AcqError::EdgeSource("handler already registered".into()));
        }
        *slot = Some(handler);
        Ok(())
    }

    fn disarm(&mut self) {
        self.handler.lock().take();
    }
}
