//! monitor.rs
//! Live monitor: polls the gateway on its own cadence for display and interlock purposes only.
//! - Never touches the sample log; the displayed sample count comes from the capture metrics
//! - Every poll re-evaluates the interlock so the rig is protected with no capture in progress
//! - Display failures are counted and logged, never fatal

use std::{
    io::{self, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};
use thiserror::Error;

use crate::acquisition::{
    converter::Calibration,
    sensor::{ChannelId, ChannelKind, Reading, SensorGateway, read_snapshot},
};
use crate::config::RigConfig;
use crate::error::AcqResult;
use crate::safety::interlock::{AlarmState, Interlock, InterlockState};
use crate::utils::metrics::SharedMetrics;

pub const LCD_COLS: usize = 20;
pub const LCD_ROWS: usize = 4;

const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
#[error("display error: {0}")]
pub struct DisplayError(pub String);

impl From<io::Error> for DisplayError {
    fn from(e: io::Error) -> Self {
        DisplayError(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySnapshot {
    pub temperatures: Vec<Reading>,
    pub pressures: Vec<Reading>,
    pub sample_count: u64,
    pub hot_wall_temp: f64,
    pub interlock: InterlockState,
}

/// Renders monitor snapshots (terminal, character LCD, ...).
pub trait StatusDisplay: Send {
    fn render(&mut self, snapshot: &DisplaySnapshot) -> Result<(), DisplayError>;
}

/// `     Open     ` style fixed-width cell; numeric values carry their unit.
pub fn format_reading(reading: &Reading) -> String {
    let unit = match reading.kind {
        ChannelKind::Temperature => "C",
        ChannelKind::Pressure => "bar",
    };
    match (reading.value(), reading.quality.marker()) {
        (Some(v), _) => format!("{:12.2} {}", v, unit),
        (None, Some(marker)) => format!("{:>14}", marker),
        (None, None) => String::new(),
    }
}

/// Single terminal status line: sample count, every channel, interlock state.
pub fn terminal_line(snapshot: &DisplaySnapshot) -> String {
    let mut line = format!("{:8}", snapshot.sample_count);
    for r in snapshot.temperatures.iter().chain(&snapshot.pressures) {
        line.push_str(&format_reading(r));
    }
    line.push_str(match snapshot.interlock.state() {
        AlarmState::Safe => "   SAFE",
        AlarmState::Alarm => "   ALARM",
    });
    line
}

fn lcd_cell(reading: Option<&Reading>, precision: usize) -> String {
    match reading {
        Some(r) => {
            let label = format!("{}{}", r.kind.prefix(), r.channel + 1);
            match (r.value(), r.quality.marker()) {
                (Some(v), _) => format!("{}={:.*}", label, precision, v),
                (None, Some(m)) => format!("{}={}", label, m),
                (None, None) => label,
            }
        }
        None => String::new(),
    }
}

fn fit(line: String) -> String {
    line.chars().take(LCD_COLS).collect()
}

/// 20×4 character layout: two T/P rows, hot wall temperature, readiness and sample count.
pub fn lcd_lines(snapshot: &DisplaySnapshot) -> [String; LCD_ROWS] {
    let row = |i: usize| {
        fit(format!(
            "{:<10}{}",
            lcd_cell(snapshot.temperatures.get(i), 1),
            lcd_cell(snapshot.pressures.get(i), 2)
        ))
    };
    let status = match snapshot.interlock.state() {
        AlarmState::Safe => "IN>READY",
        AlarmState::Alarm => "ALARM!",
    };
    [
        row(0),
        row(1),
        fit(format!("TH={:.1}", snapshot.hot_wall_temp)),
        fit(format!("{:<10}N={:>4}", status, snapshot.sample_count)),
    ]
}

/// Writes to stdout: a refreshed single line, or the LCD frame.
pub struct TerminalDisplay {
    lcd_frame: bool,
}

impl TerminalDisplay {
    pub fn new(lcd_frame: bool) -> Self {
        Self { lcd_frame }
    }
}

impl StatusDisplay for TerminalDisplay {
    fn render(&mut self, snapshot: &DisplaySnapshot) -> Result<(), DisplayError> {
        let mut out = io::stdout().lock();
        if self.lcd_frame {
            writeln!(out, "+{}+", "-".repeat(LCD_COLS))?;
            for line in lcd_lines(snapshot) {
                writeln!(out, "|{:<width$}|", line, width = LCD_COLS)?;
            }
            writeln!(out, "+{}+", "-".repeat(LCD_COLS))?;
        } else {
            write!(out, "\r{}", terminal_line(snapshot))?;
        }
        out.flush()?;
        Ok(())
    }
}

pub struct LiveMonitor {
    gateway: Arc<dyn SensorGateway>,
    interlock: Arc<Interlock>,
    metrics: SharedMetrics,
    temperature_channels: Vec<ChannelId>,
    pressure_channels: Vec<ChannelId>,
    calibration: Calibration,
    interval: Duration,
    hot_wall_temp: f64,
}

impl LiveMonitor {
    pub fn new(
        config: &RigConfig,
        gateway: Arc<dyn SensorGateway>,
        interlock: Arc<Interlock>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            gateway,
            interlock,
            metrics,
            temperature_channels: config.temperature_channels.clone(),
            pressure_channels: config.pressure_channels.clone(),
            calibration: config.calibration,
            interval: Duration::from_millis(config.monitor_interval_ms),
            hot_wall_temp: config.hot_wall_temperature,
        }
    }

    /// One poll: read all channels, re-evaluate the interlock, build the display snapshot.
    pub fn poll_once(&self) -> AcqResult<DisplaySnapshot> {
        let snapshot = read_snapshot(
            self.gateway.as_ref(),
            &self.temperature_channels,
            &self.pressure_channels,
            &self.calibration,
        )?;
        let interlock = self
            .interlock
            .evaluate_worst(&snapshot.pressures)
            .unwrap_or_else(|| self.interlock.state());
        self.metrics.record_monitor_poll();

        Ok(DisplaySnapshot {
            temperatures: snapshot.temperatures,
            pressures: snapshot.pressures,
            sample_count: self.metrics.rows_captured(),
            hot_wall_temp: self.hot_wall_temp,
            interlock,
        })
    }

    /// Polls until `running` drops. Returns the first hardware error.
    pub fn run(&self, display: &mut dyn StatusDisplay, running: &AtomicBool) -> AcqResult<()> {
        debug!("[Monitor] polling every {} ms", self.interval.as_millis());
        while running.load(Ordering::Acquire) {
            let started = Instant::now();
            let snapshot = self.poll_once()?;

            if let Err(e) = display.render(&snapshot) {
                let failures = self.metrics.record_display_failure();
                if failures == 1 || failures % 100 == 0 {
                    warn!("[Monitor] {} (failure #{})", e, failures);
                }
            }

            let deadline = started + self.interval;
            while running.load(Ordering::Acquire) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep((deadline - now).min(SLEEP_SLICE));
            }
        }
        debug!("[Monitor] stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::sensor::{Quality, ScriptedGateway, configure_all};
    use crate::safety::interlock::SimulatedOutputs;
    use crate::utils::metrics::CaptureMetrics;

    fn snapshot(temps: Vec<Reading>, press: Vec<Reading>, alarm: bool) -> DisplaySnapshot {
        DisplaySnapshot {
            temperatures: temps,
            pressures: press,
            sample_count: 1,
            hot_wall_temp: 35.3,
            interlock: InterlockState {
                alarm_active: alarm,
                shutdown_active: alarm,
                threshold: 130.0,
            },
        }
    }

    #[test]
    fn faults_render_as_markers() {
        assert_eq!(
            format_reading(&Reading::temperature(0, Quality::OpenCircuit)).trim(),
            "Open"
        );
        assert_eq!(
            format_reading(&Reading::temperature(0, Quality::OverRange)).trim(),
            "OverRange"
        );
        assert_eq!(
            format_reading(&Reading::temperature(0, Quality::CommonMode)).trim(),
            "Common Mode"
        );
        assert_eq!(
            format_reading(&Reading::pressure(0, Quality::Ok(12.345))).trim(),
            "12.35 bar"
        );
    }

    #[test]
    fn lcd_layout_matches_character_display() {
        let snap = snapshot(
            vec![
                Reading::temperature(0, Quality::Ok(23.1)),
                Reading::temperature(1, Quality::CommonMode),
            ],
            vec![
                Reading::pressure(0, Quality::Ok(152.12)),
                Reading::pressure(1, Quality::Ok(123.23)),
            ],
            false,
        );
        let lines = lcd_lines(&snap);
        assert_eq!(lines[0], "T1=23.1   P1=152.12");
        assert!(lines[1].starts_with("T2=Common Mode"));
        assert_eq!(lines[2], "TH=35.3");
        assert_eq!(lines[3], "IN>READY  N=   1");
        assert!(lines.iter().all(|l| l.chars().count() <= LCD_COLS));
    }

    #[test]
    fn terminal_line_shows_alarm() {
        let snap = snapshot(vec![], vec![Reading::pressure(0, Quality::Ok(200.0))], true);
        assert!(terminal_line(&snap).ends_with("ALARM"));
    }

    struct FailingDisplay;

    impl StatusDisplay for FailingDisplay {
        fn render(&mut self, _: &DisplaySnapshot) -> Result<(), DisplayError> {
            Err(DisplayError("lcd unplugged".into()))
        }
    }

    #[test]
    fn poll_evaluates_interlock_without_capture() {
        let gw = ScriptedGateway::new().with_pressure(0, [Quality::Ok(3.0)]);
        let config = RigConfig::default();
        configure_all(&gw, &config.temperature_channels, &config.pressure_channels, config.thermocouple_type)
            .unwrap();
        let interlock = Arc::new(Interlock::new(130.0, Arc::new(SimulatedOutputs::new())));
        let monitor = LiveMonitor::new(&config, Arc::new(gw), interlock.clone(), Arc::new(CaptureMetrics::new()));

        let snap = monitor.poll_once().unwrap();
        assert_eq!(snap.sample_count, 0);
        assert!(snap.interlock.alarm_active);
        assert_eq!(interlock.state().state(), AlarmState::Alarm);
    }

    #[test]
    fn display_failure_does_not_stop_monitor() {
        let gw = ScriptedGateway::new();
        let config = RigConfig {
            monitor_interval_ms: 1,
            ..RigConfig::default()
        };
        configure_all(&gw, &config.temperature_channels, &config.pressure_channels, config.thermocouple_type)
            .unwrap();
        let metrics = Arc::new(CaptureMetrics::new());
        let interlock = Arc::new(Interlock::new(130.0, Arc::new(SimulatedOutputs::new())));
        let monitor = Arc::new(LiveMonitor::new(&config, Arc::new(gw), interlock, metrics.clone()));
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let monitor = monitor.clone();
            let running = running.clone();
            thread::spawn(move || monitor.run(&mut FailingDisplay, &running))
        };
        thread::sleep(Duration::from_millis(30));
        running.store(false, Ordering::Release);
        handle.join().unwrap().unwrap();

        let s = metrics.snapshot();
        assert!(s.monitor_polls >= 2);
        assert_eq!(s.display_failures, s.monitor_polls);
    }
}
