//! Capture metrics: contention-free counters shared by the edge handler, capture worker and monitor.
//!
//! All counters are atomics so the edge handler never blocks on bookkeeping.
//! Per-channel fault counts live in a DashMap keyed by (kind, channel).

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use log::{info, warn};

use crate::acquisition::sensor::{ChannelId, ChannelKind, Reading};

#[derive(Default)]
pub struct CaptureMetrics {
    triggers_received: AtomicU64,
    triggers_missed: AtomicU64,
    rows_captured: AtomicU64,
    deadline_misses: AtomicU64,
    monitor_polls: AtomicU64,
    display_failures: AtomicU64,
    faults: DashMap<(ChannelKind, ChannelId), AtomicU64>,
}

pub type SharedMetrics = Arc<CaptureMetrics>;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub triggers_received: u64,
    pub triggers_missed: u64,
    pub rows_captured: u64,
    pub deadline_misses: u64,
    pub monitor_polls: u64,
    pub display_failures: u64,
    pub faults: Vec<((ChannelKind, ChannelId), u64)>,
}

impl MetricsSnapshot {
    pub fn total_faults(&self) -> u64 {
        self.faults.iter().map(|(_, n)| n).sum()
    }
}

impl CaptureMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_trigger(&self) {
        self.triggers_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Edge arrived while a capture was in flight and one was already pending.
    pub fn record_missed_trigger(&self) -> u64 {
        self.triggers_missed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_row(&self, temperatures: &[Reading], pressures: &[Reading]) {
        self.rows_captured.fetch_add(1, Ordering::Relaxed);
        for r in temperatures.iter().chain(pressures) {
            if r.is_fault() {
                self.faults
                    .entry((r.kind, r.channel))
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_deadline_miss(&self) {
        self.deadline_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_monitor_poll(&self) {
        self.monitor_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_display_failure(&self) -> u64 {
        self.display_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn triggers_missed(&self) -> u64 {
        self.triggers_missed.load(Ordering::Relaxed)
    }

    pub fn rows_captured(&self) -> u64 {
        self.rows_captured.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut faults: Vec<_> = self
            .faults
            .iter()
            .map(|e| (*e.key(), e.value().load(Ordering::Relaxed)))
            .collect();
        faults.sort_by_key(|((kind, channel), _)| (kind.prefix(), *channel));

        MetricsSnapshot {
            triggers_received: self.triggers_received.load(Ordering::Relaxed),
            triggers_missed: self.triggers_missed.load(Ordering::Relaxed),
            rows_captured: self.rows_captured.load(Ordering::Relaxed),
            deadline_misses: self.deadline_misses.load(Ordering::Relaxed),
            monitor_polls: self.monitor_polls.load(Ordering::Relaxed),
            display_failures: self.display_failures.load(Ordering::Relaxed),
            faults,
        }
    }

    /// End-of-session summary to the log.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            "[Metrics] rows={} triggers={} polls={} deadline_misses={} display_failures={}",
            s.rows_captured, s.triggers_received, s.monitor_polls, s.deadline_misses, s.display_failures
        );
        if s.triggers_missed > 0 {
            warn!(
                "[Metrics] {} trigger edge(s) dropped while a capture was in flight",
                s.triggers_missed
            );
        }
        for ((kind, channel), n) in &s.faults {
            warn!("[Metrics] {}{}: {} fault reading(s)", kind.prefix(), channel + 1, n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::sensor::Quality;

    #[test]
    fn faults_are_counted_per_channel() {
        let m = CaptureMetrics::new();
        let temps = [
            Reading::temperature(0, Quality::OpenCircuit),
            Reading::temperature(1, Quality::Ok(20.0)),
        ];
        let press = [Reading::pressure(0, Quality::OverRange)];
        m.record_row(&temps, &press);
        m.record_row(&temps, &[]);

        let s = m.snapshot();
        assert_eq!(s.rows_captured, 2);
        assert_eq!(s.total_faults(), 3);
        assert!(s.faults.contains(&((ChannelKind::Temperature, 0), 2)));
        assert!(s.faults.contains(&((ChannelKind::Pressure, 0), 1)));
    }

    #[test]
    fn missed_trigger_returns_running_total() {
        let m = CaptureMetrics::new();
        assert_eq!(m.record_missed_trigger(), 1);
        assert_eq!(m.record_missed_trigger(), 2);
        assert_eq!(m.triggers_missed(), 2);
    }
}
